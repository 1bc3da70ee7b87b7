//! Coordinator registry, job store and dispatch tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use toolbus_core::ToolbusError;
use toolbus_core::clock::{Clock, ManualClock};
use toolbus_core::config::CoordinatorConfig;
use toolbus_core::coordinator::{Coordinator, CoordinatorError};
use toolbus_core::jobs::{ExecutionRequest, JobError, JobStatus};
use toolbus_core::protocol::{JobRequest, JobUpdate, ToolDescriptor, Topics};
use toolbus_core::pubsub::{
    LocalPubSub, MessageHandler, PubSub, PubSubBackend, PubSubMessage, SharedPubSub,
    SubscriptionHandle, handler,
};
use toolbus_core::tools::{ArgValue, ExecutionArguments, ParameterSchema};

struct Fixture {
    pubsub: SharedPubSub,
    clock: Arc<ManualClock>,
    coordinator: Arc<Coordinator>,
}

impl Fixture {
    fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn fixture() -> Fixture {
    let pubsub: SharedPubSub = Arc::new(LocalPubSub::new());
    let clock = Arc::new(ManualClock::default());
    let coordinator = Coordinator::builder(pubsub.clone())
        .clock(clock.clone())
        .config(CoordinatorConfig {
            stop_grace_period: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        })
        .build();
    Fixture {
        pubsub,
        clock,
        coordinator,
    }
}

fn search_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("search", "Searches the web")
        .with_parameter(ParameterSchema::string("query").with_alias("Query").required())
        .with_parameter(ParameterSchema::number("limit").with_default(10.0))
        .with_version("1.0.0")
}

fn announce(coordinator: &Coordinator, descriptor: &ToolDescriptor) {
    coordinator.on_announcement(&serde_json::to_vec(descriptor).unwrap());
}

fn update(coordinator: &Coordinator, update: &JobUpdate) {
    coordinator.on_job_update(&serde_json::to_vec(update).unwrap());
}

async fn capture(pubsub: &SharedPubSub, topic: &str) -> mpsc::UnboundedReceiver<PubSubMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    pubsub
        .subscribe(
            topic,
            handler(move |msg| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(msg);
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
    rx
}

async fn no_message(rx: &mut mpsc::UnboundedReceiver<PubSubMessage>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err()
}

#[tokio::test]
async fn test_announcement_registers_tool() {
    let f = fixture();
    announce(&f.coordinator, &search_descriptor());

    assert!(f.coordinator.has_tool("search"));
    assert_eq!(f.coordinator.tool_names(), vec!["search".to_string()]);
    let tool = f.coordinator.get_tool("search").unwrap();
    assert_eq!(tool.descriptor, search_descriptor());
    assert_eq!(tool.last_announce, f.clock_now());
    assert!(f.coordinator.get_tool("weather").is_none());
}

#[tokio::test]
async fn test_malformed_announcements_are_dropped() {
    let f = fixture();
    f.coordinator.on_announcement(b"{not json");
    f.coordinator.on_announcement(br#"{"name": ""}"#);

    let colliding = ToolDescriptor::new("broken", "")
        .with_parameter(ParameterSchema::string("a").with_alias("shared"))
        .with_parameter(ParameterSchema::string("b").with_alias("SHARED"));
    announce(&f.coordinator, &colliding);

    assert!(f.coordinator.list_tools().is_empty());
}

#[tokio::test]
async fn test_go_encoded_messages_with_null_slices() {
    let f = fixture();
    f.coordinator.on_announcement(
        br#"{
            "name": "search",
            "description": "Searches the web",
            "type": "function",
            "parameters": [{
                "name": "query",
                "aliases": null,
                "description": "",
                "var_type": "string",
                "required": true,
                "enum": null
            }],
            "response_format": null,
            "version": "1"
        }"#,
    );
    assert!(f.coordinator.has_tool("search"));

    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new(
            "j0",
            "search",
            ExecutionArguments::new().with("query", "cats"),
        ))
        .await
        .unwrap();
    let submitted = job.submitted_at().to_rfc3339();
    let payload = format!(
        r#"{{
            "job_id": "j0",
            "tool_name": "search",
            "tool_version": "1",
            "status": "Completed",
            "update_msg": "done",
            "submitted_at": "{submitted}",
            "updated_at": "{submitted}",
            "new_result_data": ["found 3 cats"],
            "new_result_files": null
        }}"#
    );
    f.coordinator.on_job_update(payload.as_bytes());

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.result_texts(), vec!["found 3 cats".to_string()]);
    assert!(job.result_files().is_empty());
}

#[tokio::test]
async fn test_latest_announcement_wins() {
    let f = fixture();
    announce(&f.coordinator, &search_descriptor());
    let v2 = ToolDescriptor::new("search", "Searches v2")
        .with_parameter(ParameterSchema::string("q").required())
        .with_version("2.0.0");
    announce(&f.coordinator, &v2);

    let tool = f.coordinator.get_tool("search").unwrap();
    assert_eq!(tool.descriptor, v2);
    assert_eq!(f.coordinator.list_tools().len(), 1);
}

#[tokio::test]
async fn test_tool_expires_after_ttl() {
    let f = fixture();
    announce(&f.coordinator, &search_descriptor());

    f.clock.advance(Duration::from_secs(60));
    assert!(f.coordinator.has_tool("search"));
    assert!(f.coordinator.prune_tools().is_empty());

    f.clock.advance(Duration::from_secs(2));
    // Hidden from reads before the prune loop runs
    assert!(!f.coordinator.has_tool("search"));
    assert!(f.coordinator.list_tools().is_empty());
    assert_eq!(f.coordinator.prune_tools(), vec!["search".to_string()]);
}

#[tokio::test]
async fn test_heartbeat_keeps_tool_alive() {
    let f = fixture();
    for _ in 0..5 {
        announce(&f.coordinator, &search_descriptor());
        f.clock.advance(Duration::from_secs(60));
        assert!(f.coordinator.prune_tools().is_empty());
    }
    assert!(f.coordinator.has_tool("search"));
}

#[tokio::test]
async fn test_submit_publishes_canonical_arguments() {
    let f = fixture();
    announce(&f.coordinator, &search_descriptor());
    let mut requests = capture(&f.pubsub, "aigency.tools.jobs.new.search").await;

    let job = f
        .coordinator
        .submit_job(
            ExecutionRequest::new(
                "j1",
                "search",
                ExecutionArguments::new().with("Query", "cats").with("junk", true),
            )
            .with_mission_id("m1"),
        )
        .await
        .unwrap();

    assert_eq!(job.status(), JobStatus::Queued);
    assert_eq!(job.parameters().get_str("Query"), Some("cats"));

    let message = requests.recv().await.unwrap();
    let request: JobRequest = message.decode().unwrap();
    assert_eq!(request.job_id, "j1");
    assert_eq!(request.mission_id, "m1");
    assert_eq!(
        request.parameters,
        ExecutionArguments::new().with("query", "cats").with("limit", 10.0)
    );
    assert_eq!(f.coordinator.job_status("j1").unwrap(), JobStatus::Queued);
}

#[tokio::test]
async fn test_invalid_submission_is_not_dispatched() {
    let f = fixture();
    let weather = ToolDescriptor::new("weather", "Current weather")
        .with_parameter(ParameterSchema::string("location").required());
    announce(&f.coordinator, &weather);
    let mut requests = capture(&f.pubsub, "aigency.tools.jobs.new.weather").await;

    let err = f
        .coordinator
        .submit_job(ExecutionRequest::new(
            "j2",
            "weather",
            ExecutionArguments::new().with("city", "Oslo"),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolbusError::Validation(e) if e.parameter() == "location"));
    assert!(f.coordinator.get_job("j2").is_none());
    assert!(no_message(&mut requests).await);
}

#[tokio::test]
async fn test_duplicate_job_id_is_rejected() {
    let f = fixture();
    let request = ExecutionRequest::new("j3", "search", ExecutionArguments::new().with("query", "x"));
    f.coordinator.submit_job(request.clone()).await.unwrap();

    let err = f.coordinator.submit_job(request).await.unwrap_err();
    assert!(matches!(err, ToolbusError::Job(JobError::Duplicate(id)) if id == "j3"));
}

#[tokio::test]
async fn test_expired_job_id_can_be_reused() {
    let f = fixture();
    f.coordinator
        .submit_job(ExecutionRequest::new("j13", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    update(
        &f.coordinator,
        &JobUpdate::new("j13", "search", JobStatus::Completed, "done"),
    );
    f.clock.advance(Duration::from_secs(301));
    assert!(f.coordinator.get_job("j13").is_none());

    // Not pruned yet, but already invisible
    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new("j13", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Queued);
    assert_eq!(f.coordinator.job_status("j13").unwrap(), JobStatus::Queued);
    assert!(f.coordinator.prune_jobs().is_empty());
}

#[tokio::test]
async fn test_unregistered_tool_receives_raw_arguments() {
    let f = fixture();
    let mut requests = capture(&f.pubsub, "aigency.tools.jobs.new.later").await;

    f.coordinator
        .submit_job(ExecutionRequest::new(
            "j4",
            "later",
            ExecutionArguments::new().with("Anything", ArgValue::Null),
        ))
        .await
        .unwrap();

    let request: JobRequest = requests.recv().await.unwrap().decode().unwrap();
    assert!(request.parameters.contains_key("Anything"));
}

#[tokio::test]
async fn test_updates_drive_job_lifecycle() {
    let f = fixture();
    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new("j5", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    let mut listener = job.subscribe();

    update(
        &f.coordinator,
        &JobUpdate::new("j5", "search", JobStatus::Running, "working")
            .with_texts(vec!["partial".to_string()])
            .with_sequence(1),
    );
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(listener.recv().await.unwrap().status, JobStatus::Running);

    update(
        &f.coordinator,
        &JobUpdate::new("j5", "search", JobStatus::Completed, "done")
            .with_texts(vec!["found 3 cats".to_string()])
            .with_sequence(2),
    );
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(
        job.result_texts(),
        vec!["partial".to_string(), "found 3 cats".to_string()]
    );
    assert_eq!(job.ended_at(), Some(f.clock_now()));

    // Late update: nothing changes
    update(
        &f.coordinator,
        &JobUpdate::new("j5", "search", JobStatus::Failed, "too late")
            .with_texts(vec!["ignored".to_string()])
            .with_sequence(3),
    );
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.result_texts().len(), 2);
    assert_eq!(job.status_message(), "done");
}

#[tokio::test]
async fn test_stale_and_foreign_updates_are_rejected() {
    let f = fixture();
    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new("j6", "search", ExecutionArguments::new()))
        .await
        .unwrap();

    update(
        &f.coordinator,
        &JobUpdate::new("j6", "search", JobStatus::Running, "").with_sequence(5),
    );
    update(
        &f.coordinator,
        &JobUpdate::new("j6", "search", JobStatus::Completed, "").with_sequence(4),
    );
    assert_eq!(job.status(), JobStatus::Running);

    update(
        &f.coordinator,
        &JobUpdate::new("j6", "weather", JobStatus::Completed, ""),
    );
    assert_eq!(job.status(), JobStatus::Running);

    // Never back to Queued once started
    update(
        &f.coordinator,
        &JobUpdate::new("j6", "search", JobStatus::Queued, "").with_sequence(6),
    );
    assert_eq!(job.status(), JobStatus::Running);

    // Unknown job: never resurrected
    update(
        &f.coordinator,
        &JobUpdate::new("ghost", "search", JobStatus::Completed, ""),
    );
    assert!(f.coordinator.get_job("ghost").is_none());
    f.coordinator.on_job_update(b"garbage");
}

#[tokio::test]
async fn test_ended_job_retention() {
    let f = fixture();
    f.coordinator
        .submit_job(ExecutionRequest::new("j7", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    update(
        &f.coordinator,
        &JobUpdate::new("j7", "search", JobStatus::Failed, "boom"),
    );

    f.clock.advance(Duration::from_secs(299));
    assert!(f.coordinator.get_job("j7").is_some());
    assert!(f.coordinator.prune_jobs().is_empty());

    f.clock.advance(Duration::from_secs(2));
    assert!(f.coordinator.get_job("j7").is_none());
    assert!(matches!(
        f.coordinator.job_status("j7"),
        Err(ToolbusError::Coordinator(CoordinatorError::JobNotFound(_)))
    ));
    assert_eq!(f.coordinator.prune_jobs(), vec!["j7".to_string()]);
}

#[tokio::test]
async fn test_running_jobs_are_never_pruned() {
    let f = fixture();
    f.coordinator
        .submit_job(ExecutionRequest::new("j8", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    update(
        &f.coordinator,
        &JobUpdate::new("j8", "search", JobStatus::Running, ""),
    );

    f.clock.advance(Duration::from_secs(86_400));
    assert!(f.coordinator.prune_jobs().is_empty());
    assert_eq!(f.coordinator.list_jobs().len(), 1);
}

#[tokio::test]
async fn test_stop_publishes_raw_job_id() {
    let f = fixture();
    let mut stops = capture(&f.pubsub, "aigency.tools.jobs.stop.search").await;
    f.coordinator
        .submit_job(ExecutionRequest::new("j9", "search", ExecutionArguments::new()))
        .await
        .unwrap();

    f.coordinator.stop_job("j9").await.unwrap();
    assert_eq!(stops.recv().await.unwrap().text(), "j9");

    // Advisory only
    assert_eq!(f.coordinator.job_status("j9").unwrap(), JobStatus::Queued);

    // Unknown jobs are logged and dropped, nothing is published
    f.coordinator.stop_job("nope").await.unwrap();
    assert!(no_message(&mut stops).await);
}

/// Bus whose stop topics are unreachable
#[derive(Debug)]
struct StopTopicsDown(LocalPubSub);

#[async_trait]
impl PubSub for StopTopicsDown {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> toolbus_core::Result<()> {
        if topic.contains(".stop.") {
            return Err(ToolbusError::PubSub("connection reset".to_string()));
        }
        self.0.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> toolbus_core::Result<SubscriptionHandle> {
        self.0.subscribe(topic, handler).await
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn backend_type(&self) -> PubSubBackend {
        PubSubBackend::Local
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_publish_falls_back_to_cancel() {
    let pubsub: SharedPubSub = Arc::new(StopTopicsDown(LocalPubSub::new()));
    let coordinator = Coordinator::builder(pubsub)
        .config(CoordinatorConfig {
            stop_grace_period: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        })
        .build();
    let job = coordinator
        .submit_job(ExecutionRequest::new("j12", "search", ExecutionArguments::new()))
        .await
        .unwrap();

    coordinator.stop_job("j12").await.unwrap();
    assert_eq!(job.status(), JobStatus::Queued);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(job.status(), JobStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_stop_forces_cancelled() {
    let f = fixture();
    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new("j10", "search", ExecutionArguments::new()))
        .await
        .unwrap();
    update(
        &f.coordinator,
        &JobUpdate::new("j10", "search", JobStatus::Running, ""),
    );

    f.coordinator.stop_job("j10").await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(job.status(), JobStatus::Running);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert!(job.status_message().contains("no response"));
}

#[tokio::test(start_paused = true)]
async fn test_answered_stop_keeps_tool_outcome() {
    let f = fixture();
    let job = f
        .coordinator
        .submit_job(ExecutionRequest::new("j11", "search", ExecutionArguments::new()))
        .await
        .unwrap();

    f.coordinator.stop_job("j11").await.unwrap();
    update(
        &f.coordinator,
        &JobUpdate::new("j11", "search", JobStatus::Cancelled, "cancelled by request"),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert_eq!(job.status_message(), "cancelled by request");
    assert_eq!(job.updates().len(), 1);
}

#[tokio::test]
async fn test_function_definitions() {
    let f = fixture();
    announce(&f.coordinator, &search_descriptor());
    announce(
        &f.coordinator,
        &ToolDescriptor::new("weather", "Weather").with_parameter(ParameterSchema::string("city")),
    );

    let all = f.coordinator.function_definitions(None).unwrap();
    let names: Vec<&str> = all.iter().map(|d| d.function.name.as_str()).collect();
    assert_eq!(names, vec!["search", "weather"]);

    let one = f.coordinator.function_definitions(Some(&["weather"][..])).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].function.parameters.required, Vec::<String>::new());

    assert!(matches!(
        f.coordinator.function_definitions(Some(&["missing"][..])),
        Err(ToolbusError::Coordinator(CoordinatorError::ToolNotFound(_)))
    ));
}

#[tokio::test]
async fn test_start_subscribes_to_bus() {
    let f = fixture();
    f.coordinator.start().await.unwrap();
    assert!(matches!(
        f.coordinator.start().await,
        Err(ToolbusError::Coordinator(CoordinatorError::AlreadyStarted))
    ));

    let topics = Topics::default();
    f.pubsub
        .publish(&topics.announce, serde_json::to_vec(&search_descriptor()).unwrap())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !f.coordinator.has_tool("search") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    f.coordinator.shutdown();
}
