//! Worker-side hosting of a tool
//!
//! A [`ToolWorker`] advertises its tool on the announce topic at a fixed
//! interval, accepts job requests on its per-tool topic, runs them and
//! publishes their updates. Every accepted job ends with exactly one terminal
//! update: either the executor's outcome or, when a stop request wins the
//! race, a `Cancelled`.

use super::result::JobResults;
use super::schema::check_schema_set;
use super::tool::{BoxedTool, ToolCapability};
use crate::error::Result;
use crate::jobs::{ExecutionRequest, JobStatus};
use crate::protocol::{JobRequest, JobUpdate, ToolDescriptor, Topics, decode};
use crate::pubsub::{PubSubExt, SharedPubSub, SubscriptionHandle, handler};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Default heartbeat period
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);

/// Hosts one tool on the bus
pub struct ToolWorker {
    tool: BoxedTool,
    pubsub: SharedPubSub,
    topics: Topics,
    announce_interval: Duration,
    sequence: AtomicU64,
    running: Mutex<HashMap<String, AbortHandle>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    shutdown: CancellationToken,
}

impl ToolWorker {
    pub fn new(tool: impl ToolCapability + 'static, pubsub: SharedPubSub) -> Result<Self> {
        Self::from_boxed(Arc::new(tool), pubsub)
    }

    pub fn from_boxed(tool: BoxedTool, pubsub: SharedPubSub) -> Result<Self> {
        check_schema_set(&tool.descriptor().parameters)?;
        Ok(Self {
            tool,
            pubsub,
            topics: Topics::default(),
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            sequence: AtomicU64::new(0),
            running: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        self.tool.descriptor()
    }

    /// Ids of jobs currently executing
    pub fn running_jobs(&self) -> Vec<String> {
        self.lock_running().keys().cloned().collect()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.lock_running().contains_key(job_id)
    }

    /// Publish the descriptor on the announce topic
    pub async fn announce(&self) -> Result<()> {
        self.pubsub
            .publish_json(&self.topics.announce, self.descriptor())
            .await
    }

    /// Subscribe to the job topics, announce, and keep announcing
    ///
    /// Subscription failures are returned; a failed first announcement is
    /// only logged since the next heartbeat retries it.
    pub async fn start(self) -> Result<Arc<Self>> {
        let worker = Arc::new(self);
        let name = worker.name().to_string();

        let weak = Arc::downgrade(&worker);
        let jobs = worker
            .pubsub
            .subscribe(
                &worker.topics.job_new_for(&name),
                handler(move |message| {
                    let weak: Weak<ToolWorker> = weak.clone();
                    async move {
                        if let Some(worker) = weak.upgrade() {
                            worker.on_job_message(&message.payload).await;
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        let weak = Arc::downgrade(&worker);
        let stops = worker
            .pubsub
            .subscribe(
                &worker.topics.job_stop_for(&name),
                handler(move |message| {
                    let weak: Weak<ToolWorker> = weak.clone();
                    async move {
                        if let Some(worker) = weak.upgrade() {
                            worker.on_stop_message(&message.payload).await;
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        worker
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([jobs, stops]);

        if let Err(e) = worker.announce().await {
            tracing::error!(tool = %name, error = %e, "initial announcement failed");
        }

        let weak = Arc::downgrade(&worker);
        let shutdown = worker.shutdown.clone();
        let period = worker.announce_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(worker) = weak.upgrade() else { break };
                match worker.announce().await {
                    Ok(()) => tracing::trace!(tool = %worker.name(), "announced"),
                    Err(e) => tracing::error!(tool = %worker.name(), error = %e, "announcement failed"),
                }
            }
        });

        tracing::info!(tool = %name, version = %worker.descriptor().version, "tool worker started");
        Ok(worker)
    }

    /// Stop announcing, drop subscriptions and abort running jobs
    ///
    /// Aborted jobs publish nothing.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for subscription in self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            subscription.unsubscribe();
        }
        for (job_id, task) in self.lock_running().drain() {
            tracing::debug!(job_id = %job_id, "aborting job on shutdown");
            task.abort();
        }
    }

    /// Run the executor and publish exactly one terminal update
    pub async fn execute(&self, request: ExecutionRequest) -> JobResults {
        let submitted_at = Utc::now();
        let results = self.run(request).await;
        self.publish_results(&results, submitted_at).await;
        results
    }

    /// Handle a raw job request
    pub async fn on_job_message(self: &Arc<Self>, payload: &[u8]) {
        let request: JobRequest = match decode(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(tool = %self.name(), bytes = payload.len(), error = %e, "undecodable job request");
                match JobRequest::recover_job_id(payload) {
                    Some(job_id) => {
                        let update = self.update(&job_id, JobStatus::Failed, format!("invalid job request: {}", e));
                        self.send(update).await;
                    }
                    None => tracing::warn!(tool = %self.name(), "no job id recoverable, request dropped"),
                }
                return;
            }
        };

        if request.tool_name != self.name() {
            tracing::warn!(
                tool = %self.name(),
                requested = %request.tool_name,
                job_id = %request.job_id,
                "job request for another tool dropped"
            );
            return;
        }

        if self.is_running(&request.job_id) {
            tracing::warn!(tool = %self.name(), job_id = %request.job_id, "duplicate job request dropped");
            return;
        }

        let submitted_at = request.submitted_at;
        let mut execution = ExecutionRequest::from(request);
        match self.tool.validate(&execution.arguments) {
            Ok(arguments) => execution.arguments = arguments,
            Err(e) => {
                tracing::info!(tool = %self.name(), job_id = %execution.job_id, error = %e, "job rejected");
                let update = self
                    .update(&execution.job_id, JobStatus::Failed, e.to_string())
                    .with_submitted_at(submitted_at);
                self.send(update).await;
                return;
            }
        }

        let running = self
            .update(&execution.job_id, JobStatus::Running, "running")
            .with_submitted_at(submitted_at);
        self.send(running).await;

        let job_id = execution.job_id.clone();
        let worker = Arc::clone(self);
        let mut jobs = self.lock_running();
        let task = tokio::spawn({
            let job_id = job_id.clone();
            async move {
                let results = worker.run(execution).await;
                // Whoever removes the entry owns the terminal update
                let owned = worker.lock_running().remove(&job_id).is_some();
                if owned {
                    worker.publish_results(&results, submitted_at).await;
                } else {
                    tracing::debug!(job_id = %job_id, "job was stopped, result discarded");
                }
            }
        });
        jobs.insert(job_id, task.abort_handle());
    }

    /// Handle a stop request; the body is the raw job id
    pub async fn on_stop_message(&self, payload: &[u8]) {
        let job_id = String::from_utf8_lossy(payload).trim().to_string();
        let task = self.lock_running().remove(&job_id);
        match task {
            Some(task) => {
                task.abort();
                tracing::info!(tool = %self.name(), job_id = %job_id, "job stopped");
                let update = self.update(&job_id, JobStatus::Cancelled, "cancelled by request");
                self.send(update).await;
            }
            None => tracing::debug!(tool = %self.name(), job_id = %job_id, "stop for unknown job"),
        }
    }

    async fn run(&self, request: ExecutionRequest) -> JobResults {
        let job_id = request.job_id.clone();
        tracing::debug!(tool = %self.name(), job_id = %job_id, "executing");
        match self.tool.execute(request).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(tool = %self.name(), job_id = %job_id, error = %e, "execution failed");
                JobResults::new(job_id, self.name()).failed(e.to_string())
            }
        }
    }

    async fn publish_results(&self, results: &JobResults, submitted_at: DateTime<Utc>) {
        let status = results.terminal_state();
        let message = match (&results.error, status) {
            (Some(error), _) => error.clone(),
            (None, status) => status.as_str().to_lowercase(),
        };
        let update = self
            .update(&results.job_id, status, message)
            .with_submitted_at(submitted_at)
            .with_texts(results.result_texts.clone())
            .with_files(results.result_files.clone());
        self.send(update).await;
    }

    fn update(&self, job_id: &str, status: JobStatus, message: impl Into<String>) -> JobUpdate {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        JobUpdate::new(job_id, self.name(), status, message)
            .with_tool_version(self.descriptor().version.clone())
            .with_sequence(sequence)
    }

    async fn send(&self, update: JobUpdate) {
        if let Err(e) = self.pubsub.publish_json(&self.topics.job_update, &update).await {
            tracing::error!(
                tool = %self.name(),
                job_id = %update.job_id,
                status = %update.status,
                error = %e,
                "failed to publish job update"
            );
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ToolWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ToolWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolWorker")
            .field("tool", &self.name())
            .field("backend", &self.pubsub.backend_type())
            .field("announce_interval", &self.announce_interval)
            .finish()
    }
}
