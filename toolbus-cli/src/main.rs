//! Toolbus CLI - run a coordinator, a demo worker or submit jobs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolbus_core::prelude::*;

#[derive(Parser)]
#[command(name = "toolbus")]
#[command(about = "Tool discovery and job dispatch over pub/sub", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, replacing toolbus.toml and environment overrides
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coordinator until interrupted
    Coordinator {
        /// Log live tools and jobs at this interval
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration, default_value = "30s")]
        report_interval: Duration,
    },
    /// Run the demo echo tool until interrupted
    Worker {
        /// Name the echo tool announces under
        #[arg(long, default_value = "echo")]
        name: String,
    },
    /// Submit one job and wait for it to end
    Submit {
        /// Target tool
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Job id, generated when omitted
        #[arg(long)]
        job_id: Option<String>,
        /// How long to wait for the tool to announce itself
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration, default_value = "5s")]
        discover: Duration,
        /// How long to wait for the job to end
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration, default_value = "60s")]
        timeout: Duration,
    },
    /// Coordinator, echo worker and one job in a single process
    Demo {
        /// Text for the echo tool
        #[arg(default_value = "hello")]
        text: String,
    },
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ToolbusConfig::from_file(path)?,
        None => ToolbusConfig::load()?,
    };

    match cli.command {
        Commands::Version => {
            println!("toolbus {}", env!("CARGO_PKG_VERSION"));
            println!("toolbus-core {}", toolbus_core::VERSION);
        }
        Commands::Config => {
            let mut shown = config.clone();
            if shown.pubsub.password.is_some() {
                shown.pubsub.password = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        Commands::Coordinator { report_interval } => {
            let pubsub = connect(&config).await?;
            let coordinator = build_coordinator(&config, pubsub);
            coordinator.start().await?;

            let mut ticker = tokio::time::interval(report_interval);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        let tools = coordinator.tool_names();
                        let jobs = coordinator.list_jobs();
                        let active = jobs.iter().filter(|job| !job.is_ended()).count();
                        tracing::info!(tools = ?tools, jobs = jobs.len(), active, "coordinator status");
                    }
                }
            }
            coordinator.shutdown();
        }
        Commands::Worker { name } => {
            let pubsub = connect(&config).await?;
            let worker = echo_worker(&config, pubsub, &name)?.start().await?;
            tokio::signal::ctrl_c().await?;
            worker.shutdown();
        }
        Commands::Submit {
            tool,
            args,
            job_id,
            discover,
            timeout,
        } => {
            if config.pubsub.mode == PubSubMode::Local {
                tracing::warn!("local transport only reaches tools in this process; set pubsub.mode = \"nats\"");
            }
            let pubsub = connect(&config).await?;
            let coordinator = build_coordinator(&config, pubsub);
            coordinator.start().await?;

            let arguments = parse_arguments(&args)?;
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            if !wait_for_tool(&coordinator, &tool, discover).await {
                tracing::warn!(tool = %tool, "tool not announced yet, dispatching arguments unchecked");
            }
            let results = run_job(&coordinator, ExecutionRequest::new(job_id, tool, arguments), timeout).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            coordinator.shutdown();

            if !results.is_success() {
                bail!("job ended {}", results.final_state);
            }
        }
        Commands::Demo { text } => {
            let pubsub: SharedPubSub = Arc::new(LocalPubSub::with_capacity(config.pubsub.buffer_size));
            let coordinator = build_coordinator(&config, pubsub.clone());
            coordinator.start().await?;
            let worker = echo_worker(&config, pubsub, "echo")?.start().await?;

            if !wait_for_tool(&coordinator, "echo", Duration::from_secs(2)).await {
                bail!("echo tool never announced");
            }
            let request = ExecutionRequest::new(
                uuid::Uuid::new_v4().to_string(),
                "echo",
                ExecutionArguments::new().with("Message", text),
            );
            let results = run_job(&coordinator, request, Duration::from_secs(10)).await?;
            println!("{}", results.result_text("\n"));

            worker.shutdown();
            coordinator.shutdown();
        }
    }

    Ok(())
}

async fn connect(config: &ToolbusConfig) -> Result<SharedPubSub> {
    let pubsub = PubSubBuilder::from_config(&config.pubsub)
        .build()
        .await
        .context("failed to connect to the pub/sub transport")?;
    Ok(Arc::new(pubsub))
}

fn build_coordinator(config: &ToolbusConfig, pubsub: SharedPubSub) -> Arc<Coordinator> {
    Coordinator::builder(pubsub)
        .topics(config.topics.clone())
        .config(config.coordinator.clone())
        .build()
}

/// Echo tool: repeats `text` `repeat` times
fn echo_worker(config: &ToolbusConfig, pubsub: SharedPubSub, name: &str) -> Result<ToolWorker> {
    let descriptor = ToolDescriptor::new(name, "Echoes the given text back")
        .with_parameter(
            ParameterSchema::string("text")
                .with_aliases(["message", "input"])
                .with_description("Text to echo")
                .required(),
        )
        .with_parameter(
            ParameterSchema::number("repeat")
                .with_description("How many times to repeat the text")
                .with_default(1.0),
        )
        .with_version(toolbus_core::VERSION);

    let tool = Tool::new(descriptor)?.with_fn(|request| async move {
        let text = request.arguments.get_str("text").unwrap_or_default().to_string();
        let repeat = request.arguments.get_i64("repeat").unwrap_or(1).max(1);
        let mut results = JobResults::new(request.job_id, request.tool_name);
        for _ in 0..repeat {
            results.add_result_text(text.clone());
        }
        Ok(results.completed())
    });

    Ok(ToolWorker::new(tool, pubsub)?
        .with_topics(config.topics.clone())
        .with_announce_interval(config.worker.announce_interval))
}

fn parse_arguments(raw: &str) -> Result<ExecutionArguments> {
    let value: serde_json::Value = serde_json::from_str(raw).context("arguments are not valid JSON")?;
    if !value.is_object() {
        bail!("arguments must be a JSON object");
    }
    Ok(ExecutionArguments::from_json(value))
}

async fn wait_for_tool(coordinator: &Coordinator, name: &str, within: Duration) -> bool {
    tokio::time::timeout(within, async {
        while !coordinator.has_tool(name) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok()
}

async fn run_job(coordinator: &Coordinator, request: ExecutionRequest, timeout: Duration) -> Result<JobResults> {
    let job = coordinator.submit_job(request).await?;
    tracing::info!(job_id = %job.job_id(), tool = %job.tool_name(), "job submitted");

    if tokio::time::timeout(timeout, job.wait_until_ended()).await.is_err() {
        tracing::warn!(job_id = %job.job_id(), "job still running, requesting stop");
        coordinator.stop_job(job.job_id()).await?;
        bail!("job {} did not end within {:?}", job.job_id(), timeout);
    }
    Ok(job.results())
}
