//! In-memory job store

use super::job::{Job, JobError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Jobs keyed by id
///
/// Not synchronized; the coordinator guards it with its own lock.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<String, Arc<Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new job; an id that is already tracked is rejected, not merged
    pub fn insert(&mut self, job: Arc<Job>) -> Result<(), JobError> {
        if self.jobs.contains_key(job.job_id()) {
            return Err(JobError::Duplicate(job.job_id().to_string()));
        }
        self.jobs.insert(job.job_id().to_string(), job);
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<&Arc<Job>> {
        self.jobs.get(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn remove(&mut self, job_id: &str) -> Option<Arc<Job>> {
        self.jobs.remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.values()
    }

    /// Remove ended jobs past the retention window, returning their ids
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.is_expired(now, retention))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }
}
