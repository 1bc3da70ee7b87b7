//! A single job and its lifecycle
//!
//! A [`Job`] is only mutated through [`Job::apply_update`]. Each applied
//! update is recorded first and then broadcast to local listeners on a bounded
//! channel, so a listener never sees a state the job has not recorded and a
//! missing or slow listener never blocks the updater.

use super::status::JobStatus;
use crate::clock::elapsed;
use crate::protocol::{FileDescriptor, JobRequest, JobUpdate};
use crate::tools::{ExecutionArguments, JobResults};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default capacity of the per-job update channel
pub const DEFAULT_UPDATE_BUFFER: usize = 64;

/// Request to execute a tool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Caller-supplied, unique for the lifetime of the job
    pub job_id: String,
    pub tool_name: String,
    pub arguments: ExecutionArguments,
    #[serde(default)]
    pub mission_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub run_id: String,
}

impl ExecutionRequest {
    pub fn new(
        job_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: ExecutionArguments,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            tool_name: tool_name.into(),
            arguments,
            ..Default::default()
        }
    }

    pub fn with_mission_id(mut self, mission_id: impl Into<String>) -> Self {
        self.mission_id = mission_id.into();
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

impl From<JobRequest> for ExecutionRequest {
    fn from(request: JobRequest) -> Self {
        Self {
            job_id: request.job_id,
            tool_name: request.tool_name,
            arguments: request.parameters,
            mission_id: request.mission_id,
            thread_id: request.thread_id,
            run_id: request.run_id,
        }
    }
}

/// Rejected job operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Update arrived after the job reached a terminal state
    #[error("late update for job '{job_id}': already {current}, got {attempted}")]
    LateUpdate {
        job_id: String,
        current: JobStatus,
        attempted: JobStatus,
    },

    /// Update sequence not newer than the last applied one
    #[error("out-of-order update for job '{job_id}': sequence {sequence} <= {last}")]
    OutOfOrder {
        job_id: String,
        sequence: u64,
        last: u64,
    },

    /// `Unknown` is not a state a job can move into
    #[error("update for job '{job_id}' carries status Unknown")]
    UnknownStatus { job_id: String },

    /// A job that has started cannot go back to `Queued`
    #[error("update for job '{job_id}' moves it from {current} back to Queued")]
    BackToQueued { job_id: String, current: JobStatus },

    /// A job with this id is already tracked
    #[error("job '{0}' already exists")]
    Duplicate(String),
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    status_message: String,
    tool_version: String,
    updates: Vec<JobUpdate>,
    result_texts: Vec<String>,
    result_files: Vec<FileDescriptor>,
    last_update_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    last_sequence: Option<u64>,
}

/// Serializable view of a job at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub tool_name: String,
    pub tool_version: String,
    pub status: JobStatus,
    pub status_message: String,
    pub parameters: ExecutionArguments,
    pub mission_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub result_texts: Vec<String>,
    pub result_files: Vec<FileDescriptor>,
    pub submitted_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One invocation of a tool
#[derive(Debug)]
pub struct Job {
    job_id: String,
    tool_name: String,
    parameters: ExecutionArguments,
    mission_id: String,
    thread_id: String,
    run_id: String,
    submitted_at: DateTime<Utc>,
    state: RwLock<JobState>,
    updates_tx: broadcast::Sender<JobUpdate>,
}

impl Job {
    /// Create a queued job from a request
    pub fn new(request: ExecutionRequest, submitted_at: DateTime<Utc>, update_buffer: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(update_buffer.max(1));
        Self {
            job_id: request.job_id,
            tool_name: request.tool_name,
            parameters: request.arguments,
            mission_id: request.mission_id,
            thread_id: request.thread_id,
            run_id: request.run_id,
            submitted_at,
            state: RwLock::new(JobState {
                status: JobStatus::Queued,
                status_message: String::new(),
                tool_version: String::new(),
                updates: Vec::new(),
                result_texts: Vec::new(),
                result_files: Vec::new(),
                last_update_at: submitted_at,
                ended_at: None,
                last_sequence: None,
            }),
            updates_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a status update
    ///
    /// Results are appended, never replaced. `ended_at` is set on the first
    /// transition into a terminal state; once terminal, every further update is
    /// rejected without mutating the job.
    pub fn apply_update(&self, update: &JobUpdate, at: DateTime<Utc>) -> Result<(), JobError> {
        let mut state = self.write();

        if state.status.is_terminal() {
            return Err(JobError::LateUpdate {
                job_id: self.job_id.clone(),
                current: state.status,
                attempted: update.status,
            });
        }
        if update.status == JobStatus::Unknown {
            return Err(JobError::UnknownStatus {
                job_id: self.job_id.clone(),
            });
        }
        if update.status == JobStatus::Queued && state.status != JobStatus::Queued {
            return Err(JobError::BackToQueued {
                job_id: self.job_id.clone(),
                current: state.status,
            });
        }
        if let (Some(sequence), Some(last)) = (update.sequence, state.last_sequence) {
            if sequence <= last {
                return Err(JobError::OutOfOrder {
                    job_id: self.job_id.clone(),
                    sequence,
                    last,
                });
            }
        }

        state.status = update.status;
        state.status_message = update.update_msg.clone();
        state.last_update_at = at;
        if !update.tool_version.is_empty() {
            state.tool_version = update.tool_version.clone();
        }
        state
            .result_texts
            .extend(update.new_result_texts.iter().cloned());
        state
            .result_files
            .extend(update.new_result_files.iter().cloned());
        if update.status.is_terminal() && state.ended_at.is_none() {
            state.ended_at = Some(at);
        }
        if update.sequence.is_some() {
            state.last_sequence = update.sequence;
        }
        state.updates.push(update.clone());

        // Still under the write lock: listeners see updates in applied order.
        let _ = self.updates_tx.send(update.clone());
        Ok(())
    }

    /// Listen for updates applied from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.updates_tx.subscribe()
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait_until_ended(&self) -> JobStatus {
        let mut rx = self.subscribe();
        loop {
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            match rx.recv().await {
                Ok(update) if update.status.is_terminal() => return update.status,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.status(),
            }
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Raw, pre-validation parameters
    pub fn parameters(&self) -> &ExecutionArguments {
        &self.parameters
    }

    pub fn mission_id(&self) -> &str {
        &self.mission_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn status_message(&self) -> String {
        self.read().status_message.clone()
    }

    pub fn tool_version(&self) -> String {
        self.read().tool_version.clone()
    }

    pub fn result_texts(&self) -> Vec<String> {
        self.read().result_texts.clone()
    }

    pub fn result_files(&self) -> Vec<FileDescriptor> {
        self.read().result_files.clone()
    }

    /// Every update applied so far, oldest first
    pub fn updates(&self) -> Vec<JobUpdate> {
        self.read().updates.clone()
    }

    pub fn last_update_at(&self) -> DateTime<Utc> {
        self.read().last_update_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.read().ended_at
    }

    /// True iff the status is Completed, Cancelled or Failed
    pub fn is_ended(&self) -> bool {
        self.read().status.is_terminal()
    }

    /// Ended longer than `retention` ago
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let state = self.read();
        match state.ended_at {
            Some(ended_at) if state.status.is_terminal() => elapsed(ended_at, now) > retention,
            _ => false,
        }
    }

    /// Results accumulated so far
    pub fn results(&self) -> JobResults {
        let state = self.read();
        JobResults {
            job_id: self.job_id.clone(),
            tool_name: self.tool_name.clone(),
            result_texts: state.result_texts.clone(),
            result_files: state.result_files.clone(),
            final_state: state.status,
            error: (state.status == JobStatus::Failed).then(|| state.status_message.clone()),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        JobSnapshot {
            job_id: self.job_id.clone(),
            tool_name: self.tool_name.clone(),
            tool_version: state.tool_version.clone(),
            status: state.status,
            status_message: state.status_message.clone(),
            parameters: self.parameters.clone(),
            mission_id: self.mission_id.clone(),
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            result_texts: state.result_texts.clone(),
            result_files: state.result_files.clone(),
            submitted_at: self.submitted_at,
            last_update_at: state.last_update_at,
            ended_at: state.ended_at,
        }
    }

    /// Wire request carrying the given (usually validated) parameters
    pub fn to_request(&self, parameters: ExecutionArguments) -> JobRequest {
        JobRequest {
            job_id: self.job_id.clone(),
            tool_name: self.tool_name.clone(),
            parameters,
            mission_id: self.mission_id.clone(),
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            submitted_at: self.submitted_at,
        }
    }
}
