//! Result bundle produced by a tool executor
//!
//! [`JobResults`] carries the texts and files a job produced, the state the
//! executor ended in, and an optional error. The worker turns it into exactly
//! one terminal [`JobUpdate`](crate::protocol::JobUpdate).

use crate::jobs::JobStatus;
use crate::protocol::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: String,
    #[serde(rename = "adapterName")]
    pub tool_name: String,
    pub result_texts: Vec<String>,
    pub result_files: Vec<FileDescriptor>,
    pub final_state: JobStatus,
    #[serde(default, rename = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResults {
    /// Empty results in the `Unknown` state
    pub fn new(job_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            tool_name: tool_name.into(),
            result_texts: Vec::new(),
            result_files: Vec::new(),
            final_state: JobStatus::Unknown,
            error: None,
        }
    }

    /// Mark as completed
    pub fn completed(mut self) -> Self {
        self.final_state = JobStatus::Completed;
        self
    }

    /// Mark as failed with an error message
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.final_state = JobStatus::Failed;
        self.error = Some(error.into());
        self
    }

    /// Mark as cancelled
    pub fn cancelled(mut self) -> Self {
        self.final_state = JobStatus::Cancelled;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.result_texts.push(text.into());
        self
    }

    pub fn with_file(mut self, file: FileDescriptor) -> Self {
        self.result_files.push(file);
        self
    }

    pub fn add_result_text(&mut self, text: impl Into<String>) {
        self.result_texts.push(text.into());
    }

    pub fn add_result_file(&mut self, file: FileDescriptor) {
        self.result_files.push(file);
    }

    /// All texts, each followed by `join_by`
    pub fn result_text(&self, join_by: &str) -> String {
        self.result_texts
            .iter()
            .fold(String::new(), |mut acc, text| {
                acc.push_str(text);
                acc.push_str(join_by);
                acc
            })
    }

    /// Numbered, human-readable listing of the produced files
    pub fn result_files_text(&self) -> String {
        let mut out = String::new();
        for (n, file) in self.result_files.iter().enumerate() {
            let _ = writeln!(out, "{}. File Name: '{}'", n + 1, file.file_name);
            let _ = writeln!(out, "  - Mime Type: '{}'", file.mime_type);
            let _ = writeln!(out, "  - Local File Path: '{}'", file.local_path);
            let _ = writeln!(out, "  - Public Url: '{}'", file.public_url);
        }
        out
    }

    pub fn is_success(&self) -> bool {
        self.final_state == JobStatus::Completed && self.error.is_none()
    }

    /// The terminal state to publish
    ///
    /// Executors may leave `final_state` non-terminal; that resolves to
    /// `Failed` when an error is present and `Completed` otherwise. An error
    /// always wins over a reported `Completed`.
    pub fn terminal_state(&self) -> JobStatus {
        match (self.final_state, &self.error) {
            (JobStatus::Cancelled, _) => JobStatus::Cancelled,
            (_, Some(_)) => JobStatus::Failed,
            (state, None) if state.is_terminal() => state,
            (_, None) => JobStatus::Completed,
        }
    }
}
