//! Coordinator and tool workers talking over one local bus

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use toolbus_core::prelude::*;
use toolbus_core::pubsub::handler;

const WAIT: Duration = Duration::from_secs(2);

/// Route worker and coordinator logs to the test harness (`RUST_LOG=debug`)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

async fn wait_for_tool(coordinator: &Coordinator, name: &str) {
    tokio::time::timeout(WAIT, async {
        while !coordinator.has_tool(name) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tool never registered");
}

async fn ended(job: &Job) -> JobStatus {
    tokio::time::timeout(WAIT, job.wait_until_ended())
        .await
        .expect("job never ended")
}

/// Search tool reporting the arguments it was invoked with
fn search_tool(seen: mpsc::UnboundedSender<ExecutionArguments>) -> Tool {
    let descriptor = ToolDescriptor::new("search", "Searches the web")
        .with_parameter(ParameterSchema::string("query").with_alias("Query").required())
        .with_version("1.0.0");
    Tool::new(descriptor).unwrap().with_fn(move |request| {
        let seen = seen.clone();
        async move {
            let _ = seen.send(request.arguments.clone());
            let query = request.arguments.get_str("query").unwrap_or_default().to_string();
            Ok(JobResults::new(request.job_id, request.tool_name)
                .with_text(format!("found 3 {}", query))
                .completed())
        }
    })
}

async fn bus() -> (SharedPubSub, Arc<Coordinator>) {
    init_tracing();
    let pubsub: SharedPubSub = Arc::new(LocalPubSub::new());
    let coordinator = Coordinator::builder(pubsub.clone()).build();
    assert_ok!(coordinator.start().await);
    (pubsub, coordinator)
}

#[tokio::test]
async fn test_job_runs_to_completion() {
    let (pubsub, coordinator) = bus().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let worker = ToolWorker::new(search_tool(seen_tx), pubsub.clone())
        .unwrap()
        .start()
        .await
        .unwrap();
    wait_for_tool(&coordinator, "search").await;

    let job = coordinator
        .submit_job(ExecutionRequest::new(
            "j1",
            "search",
            ExecutionArguments::new().with("Query", "cats"),
        ))
        .await
        .unwrap();

    assert_eq!(ended(&job).await, JobStatus::Completed);
    assert_eq!(
        seen_rx.recv().await.unwrap(),
        ExecutionArguments::new().with("query", "cats")
    );
    assert_eq!(job.result_texts(), vec!["found 3 cats".to_string()]);
    assert_eq!(job.tool_version(), "1.0.0");

    let results = job.results();
    assert!(results.is_success());
    assert_eq!(results.result_text("\n"), "found 3 cats\n");

    worker.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_missing_required_argument_never_reaches_tool() {
    let (pubsub, coordinator) = bus().await;
    let descriptor = ToolDescriptor::new("weather", "Current weather")
        .with_parameter(ParameterSchema::string("location").required());
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();
    let tool = Tool::new(descriptor).unwrap().with_fn(move |request| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(JobResults::new(request.job_id, request.tool_name).completed())
        }
    });
    let worker = ToolWorker::new(tool, pubsub.clone()).unwrap().start().await.unwrap();
    wait_for_tool(&coordinator, "weather").await;

    let (tx, mut requests) = mpsc::unbounded_channel();
    pubsub
        .subscribe(
            &coordinator.topics().job_new_for("weather"),
            handler(move |message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    let err = assert_err!(
        coordinator
            .submit_job(ExecutionRequest::new(
                "j2",
                "weather",
                ExecutionArguments::new().with("city", "Oslo"),
            ))
            .await
    );
    assert!(matches!(err, ToolbusError::Validation(_)));

    let published = tokio::time::timeout(Duration::from_millis(100), requests.recv()).await;
    assert!(published.is_err());
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(coordinator.get_job("j2").is_none());

    worker.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_stop_cancels_running_job() {
    let (pubsub, coordinator) = bus().await;
    let tool = Tool::new(ToolDescriptor::new("crawl", "Crawls slowly"))
        .unwrap()
        .with_fn(|request| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JobResults::new(request.job_id, request.tool_name).completed())
        });
    let worker = ToolWorker::new(tool, pubsub.clone()).unwrap().start().await.unwrap();
    wait_for_tool(&coordinator, "crawl").await;

    let job = coordinator
        .submit_job(ExecutionRequest::new("j3", "crawl", ExecutionArguments::new()))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, async {
        while job.status() != JobStatus::Running || !worker.is_running("j3") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never started");

    assert_ok!(coordinator.stop_job("j3").await);

    assert_eq!(ended(&job).await, JobStatus::Cancelled);
    assert_eq!(job.status_message(), "cancelled by request");
    assert!(!worker.is_running("j3"));
    assert!(!job.results().is_success());

    worker.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_failing_tool_reports_failure() {
    let (pubsub, coordinator) = bus().await;
    let tool = Tool::new(ToolDescriptor::new("flaky", "Always fails"))
        .unwrap()
        .with_fn(|_request| async move {
            Err::<JobResults, _>(ToolbusError::Other("upstream unavailable".to_string()))
        });
    let worker = ToolWorker::new(tool, pubsub.clone()).unwrap().start().await.unwrap();
    wait_for_tool(&coordinator, "flaky").await;

    let job = coordinator
        .submit_job(ExecutionRequest::new("j4", "flaky", ExecutionArguments::new()))
        .await
        .unwrap();

    assert_eq!(ended(&job).await, JobStatus::Failed);
    assert!(job.status_message().contains("upstream unavailable"));
    assert_eq!(job.results().error.as_deref(), Some(job.status_message().as_str()));

    worker.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_function_definitions_follow_live_tools() {
    let (pubsub, coordinator) = bus().await;
    let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
    let worker = ToolWorker::new(search_tool(seen_tx), pubsub.clone())
        .unwrap()
        .start()
        .await
        .unwrap();
    wait_for_tool(&coordinator, "search").await;

    let definitions = coordinator.function_definitions(None).unwrap();
    assert_eq!(definitions.len(), 1);
    let value = serde_json::to_value(&definitions[0]).unwrap();
    assert_eq!(value["type"], "function");
    assert_eq!(value["function"]["name"], "search");
    assert_eq!(value["function"]["parameters"]["required"], serde_json::json!(["query"]));

    worker.shutdown();
    coordinator.shutdown();
}
