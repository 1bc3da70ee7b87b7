//! The coordinator: tool registry, job store and dispatch
//!
//! The coordinator learns about tools only from announcements, dispatches
//! jobs to them, and tracks each job from the updates tools publish. Two
//! independent background loops evict silent tools and expired jobs.
//!
//! Locks guard map mutations only and are never held across a publish.

use super::registry::{RegisteredTool, ToolRegistry, Upsert};
use crate::clock::{SharedClock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::jobs::{ExecutionRequest, Job, JobError, JobStatus, JobStore};
use crate::protocol::{JobUpdate, ToolDescriptor, Topics, decode};
use crate::pubsub::{PubSubExt, SharedPubSub, SubscriptionHandle, handler};
use crate::tools::{FunctionTool, check_schema_set, validate_arguments};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Coordinator-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("coordinator already started")]
    AlreadyStarted,
}

/// Builder for [`Coordinator`]
pub struct CoordinatorBuilder {
    pubsub: SharedPubSub,
    topics: Topics,
    config: CoordinatorConfig,
    clock: SharedClock,
}

impl CoordinatorBuilder {
    pub fn topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for every TTL and retention decision
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Arc<Coordinator> {
        Arc::new(Coordinator {
            pubsub: self.pubsub,
            topics: self.topics,
            config: self.config,
            clock: self.clock,
            tools: RwLock::new(ToolRegistry::new()),
            jobs: RwLock::new(JobStore::new()),
            started: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }
}

/// Registry, job store and dispatcher for one bus
pub struct Coordinator {
    pubsub: SharedPubSub,
    topics: Topics,
    config: CoordinatorConfig,
    clock: SharedClock,
    tools: RwLock<ToolRegistry>,
    jobs: RwLock<JobStore>,
    started: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn builder(pubsub: SharedPubSub) -> CoordinatorBuilder {
        CoordinatorBuilder {
            pubsub,
            topics: Topics::default(),
            config: CoordinatorConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Subscribe to announcements and updates and start both prune loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyStarted.into());
        }

        let weak = Arc::downgrade(self);
        let announcements = self
            .pubsub
            .subscribe(
                &self.topics.announce,
                handler(move |message| {
                    let weak: Weak<Coordinator> = weak.clone();
                    async move {
                        if let Some(coordinator) = weak.upgrade() {
                            coordinator.on_announcement(&message.payload);
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        let weak = Arc::downgrade(self);
        let updates = self
            .pubsub
            .subscribe(
                &self.topics.job_update,
                handler(move |message| {
                    let weak: Weak<Coordinator> = weak.clone();
                    async move {
                        if let Some(coordinator) = weak.upgrade() {
                            coordinator.on_job_update(&message.payload);
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([announcements, updates]);

        self.spawn_prune_loop(self.config.tool_prune_interval, |c| {
            c.prune_tools();
        });
        self.spawn_prune_loop(self.config.job_prune_interval, |c| {
            c.prune_jobs();
        });

        tracing::info!(
            backend = %self.pubsub.backend_type(),
            announce = %self.topics.announce,
            updates = %self.topics.job_update,
            "coordinator started"
        );
        Ok(())
    }

    fn spawn_prune_loop(self: &Arc<Self>, period: Duration, prune: fn(&Coordinator)) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match weak.upgrade() {
                    Some(coordinator) => prune(&coordinator),
                    None => break,
                }
            }
        });
    }

    /// Stop background loops and subscriptions
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
        tracing::info!("coordinator stopped");
    }

    /// Handle a raw tool announcement
    pub fn on_announcement(&self, payload: &[u8]) {
        let descriptor: ToolDescriptor = match decode(payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(bytes = payload.len(), error = %e, "undecodable announcement dropped");
                return;
            }
        };
        if descriptor.name.trim().is_empty() {
            tracing::warn!("announcement without a tool name dropped");
            return;
        }
        if let Err(e) = check_schema_set(&descriptor.parameters) {
            tracing::warn!(tool = %descriptor.name, error = %e, "announcement with inconsistent schema dropped");
            return;
        }

        let name = descriptor.name.clone();
        let version = descriptor.version.clone();
        let outcome = self.tools_mut().upsert(descriptor, self.clock.now());
        match outcome {
            Upsert::New => tracing::info!(tool = %name, version = %version, "tool registered"),
            Upsert::VersionChanged { previous } => {
                tracing::info!(tool = %name, previous = %previous, version = %version, "tool version changed")
            }
            Upsert::Refreshed => tracing::debug!(tool = %name, "tool refreshed"),
        }
    }

    /// Evict tools whose last announcement is older than the TTL
    pub fn prune_tools(&self) -> Vec<String> {
        let evicted = self.tools_mut().prune(self.clock.now(), self.config.tool_ttl);
        for name in &evicted {
            tracing::info!(tool = %name, "tool evicted after missed announcements");
        }
        evicted
    }

    /// Evict ended jobs older than the retention window
    pub fn prune_jobs(&self) -> Vec<String> {
        let evicted = self.jobs_mut().prune(self.clock.now(), self.config.job_retention);
        for job_id in &evicted {
            tracing::info!(job_id = %job_id, "job evicted after retention");
        }
        evicted
    }

    /// Create a queued job and dispatch it to its tool
    ///
    /// When the tool is registered, arguments are validated first and only the
    /// canonical arguments are sent; a validation failure is returned and
    /// nothing is stored or published. Unknown tools receive the arguments
    /// unchanged. A publish failure does not fail the call: the job is
    /// returned already `Failed`.
    pub async fn submit_job(&self, request: ExecutionRequest) -> Result<Arc<Job>> {
        let now = self.clock.now();
        {
            let mut jobs = self.jobs_mut();
            if let Some(existing) = jobs.get(&request.job_id) {
                if !existing.is_expired(now, self.config.job_retention) {
                    return Err(JobError::Duplicate(request.job_id).into());
                }
                // Past retention but not yet pruned: the id is free again
                jobs.remove(&request.job_id);
                tracing::debug!(job_id = %request.job_id, "expired job replaced by resubmission");
            }
        }

        let parameters = {
            let tools = self.tools();
            match tools
                .get(&request.tool_name)
                .filter(|tool| !tool.is_expired(now, self.config.tool_ttl))
            {
                Some(tool) => validate_arguments(&tool.descriptor.parameters, &request.arguments)
                    .inspect_err(|e| {
                        tracing::info!(job_id = %request.job_id, tool = %request.tool_name, error = %e, "job rejected");
                    })?,
                None => {
                    tracing::debug!(tool = %request.tool_name, "tool not registered, dispatching arguments as given");
                    request.arguments.clone()
                }
            }
        };

        let job = Arc::new(Job::new(request, now, self.config.update_buffer));
        self.jobs_mut().insert(Arc::clone(&job))?;

        let topic = self.topics.job_new_for(job.tool_name());
        let wire = job.to_request(parameters);
        match self.pubsub.publish_json(&topic, &wire).await {
            Ok(()) => tracing::info!(job_id = %job.job_id(), tool = %job.tool_name(), "job dispatched"),
            Err(e) => {
                tracing::error!(job_id = %job.job_id(), topic = %topic, error = %e, "job dispatch failed");
                let failed = JobUpdate::new(
                    job.job_id(),
                    job.tool_name(),
                    JobStatus::Failed,
                    format!("dispatch failed: {}", e),
                )
                .with_submitted_at(job.submitted_at());
                if let Err(e) = job.apply_update(&failed, self.clock.now()) {
                    tracing::warn!(job_id = %job.job_id(), error = %e, "could not mark job failed");
                }
            }
        }
        Ok(job)
    }

    /// Handle a raw job update
    pub fn on_job_update(&self, payload: &[u8]) {
        let update: JobUpdate = match decode(payload) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(bytes = payload.len(), error = %e, "undecodable job update dropped");
                return;
            }
        };

        // Never resurrect jobs from updates alone
        let Some(job) = self.jobs().get(&update.job_id).cloned() else {
            tracing::debug!(job_id = %update.job_id, status = %update.status, "update for unknown job dropped");
            return;
        };
        if update.tool_name != job.tool_name() {
            tracing::warn!(
                job_id = %update.job_id,
                expected = %job.tool_name(),
                got = %update.tool_name,
                "update from another tool dropped"
            );
            return;
        }

        match job.apply_update(&update, self.clock.now()) {
            Ok(()) if update.status.is_terminal() => {
                tracing::info!(job_id = %update.job_id, status = %update.status, "job ended")
            }
            Ok(()) => tracing::debug!(job_id = %update.job_id, status = %update.status, "job updated"),
            Err(e) => tracing::warn!(job_id = %update.job_id, error = %e, "job update rejected"),
        }
    }

    /// Ask the job's tool to stop it
    ///
    /// Advisory: the job only ends when the tool reports it. If no terminal
    /// update arrives within the stop grace period the job is forced to
    /// `Cancelled` locally. Stops for unknown or ended jobs are logged and
    /// dropped; a failed stop publish is logged and left to the fallback.
    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.get_job(job_id) else {
            tracing::warn!(job_id = %job_id, "stop for unknown job dropped");
            return Ok(());
        };
        if job.is_ended() {
            tracing::debug!(job_id = %job_id, status = %job.status(), "stop for ended job ignored");
            return Ok(());
        }

        self.spawn_stop_fallback(Arc::clone(&job));

        let topic = self.topics.job_stop_for(job.tool_name());
        match self.pubsub.publish(&topic, job_id.as_bytes().to_vec()).await {
            Ok(()) => tracing::info!(job_id = %job_id, tool = %job.tool_name(), "stop requested"),
            Err(e) => tracing::error!(
                job_id = %job_id,
                topic = %topic,
                error = %e,
                "stop request failed, job will be cancelled after the grace period"
            ),
        }
        Ok(())
    }

    fn spawn_stop_fallback(&self, job: Arc<Job>) {
        let grace = self.config.stop_grace_period;
        let clock = Arc::clone(&self.clock);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }
            if job.is_ended() {
                return;
            }
            let forced = JobUpdate::new(
                job.job_id(),
                job.tool_name(),
                JobStatus::Cancelled,
                format!("no response to stop request within {:?}", grace),
            )
            .with_submitted_at(job.submitted_at());
            match job.apply_update(&forced, clock.now()) {
                Ok(()) => tracing::warn!(job_id = %job.job_id(), "job force-cancelled after stop timeout"),
                // The tool answered in the meantime
                Err(e) => tracing::debug!(job_id = %job.job_id(), error = %e, "stop fallback skipped"),
            }
        });
    }

    /// Job by id, hidden once past its retention window
    pub fn get_job(&self, job_id: &str) -> Option<Arc<Job>> {
        let now = self.clock.now();
        self.jobs()
            .get(job_id)
            .filter(|job| !job.is_expired(now, self.config.job_retention))
            .cloned()
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.get_job(job_id)
            .map(|job| job.status())
            .ok_or_else(|| CoordinatorError::JobNotFound(job_id.to_string()).into())
    }

    /// Jobs still within retention, oldest first
    pub fn list_jobs(&self) -> Vec<Arc<Job>> {
        let now = self.clock.now();
        let mut jobs: Vec<Arc<Job>> = self
            .jobs()
            .iter()
            .filter(|job| !job.is_expired(now, self.config.job_retention))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.submitted_at());
        jobs
    }

    /// Live tools, sorted by name
    pub fn list_tools(&self) -> Vec<RegisteredTool> {
        self.tools()
            .live(self.clock.now(), self.config.tool_ttl)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_tool(&self, name: &str) -> Option<RegisteredTool> {
        let now = self.clock.now();
        self.tools()
            .get(name)
            .filter(|tool| !tool.is_expired(now, self.config.tool_ttl))
            .cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.list_tools()
            .into_iter()
            .map(|tool| tool.descriptor.name)
            .collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.get_tool(name).is_some()
    }

    /// Function-calling definitions for all live tools, or the named ones
    ///
    /// # Errors
    ///
    /// `ToolNotFound` when a requested name is not live.
    pub fn function_definitions(&self, names: Option<&[&str]>) -> Result<Vec<FunctionTool>> {
        match names {
            None => Ok(self
                .list_tools()
                .iter()
                .map(|tool| tool.descriptor.function_definition())
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.get_tool(name)
                        .map(|tool| tool.descriptor.function_definition())
                        .ok_or_else(|| CoordinatorError::ToolNotFound(name.to_string()).into())
                })
                .collect(),
        }
    }

    fn tools(&self) -> RwLockReadGuard<'_, ToolRegistry> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn tools_mut(&self) -> RwLockWriteGuard<'_, ToolRegistry> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs(&self) -> RwLockReadGuard<'_, JobStore> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_mut(&self) -> RwLockWriteGuard<'_, JobStore> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backend", &self.pubsub.backend_type())
            .field("topics", &self.topics)
            .field("config", &self.config)
            .finish()
    }
}
