//! Dispatch protocol between tool workers and the coordinator
//!
//! Four topics carry JSON messages:
//!
//! | Topic        | Publisher    | Subscriber            | Body              |
//! |--------------|--------------|-----------------------|-------------------|
//! | announce     | tool workers | coordinator           | [`ToolDescriptor`] |
//! | job new      | coordinator  | the named tool only   | [`JobRequest`]     |
//! | job stop     | coordinator  | the named tool only   | raw job id         |
//! | job update   | tool workers | coordinator           | [`JobUpdate`]      |
//!
//! Field names are the external contract with tool processes written in other
//! languages and must not be renamed.

use crate::error::Result;
use crate::jobs::JobStatus;
use crate::tools::{ExecutionArguments, ParameterSchema};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder substituted with the tool name in per-tool topics
pub const TOOL_NAME_PLACEHOLDER: &str = "{{tool.name}}";

pub const DEFAULT_TOPIC_ANNOUNCE: &str = "aigency.tools.announce";
pub const DEFAULT_TOPIC_JOB_NEW: &str = "aigency.tools.jobs.new.{{tool.name}}";
pub const DEFAULT_TOPIC_JOB_STOP: &str = "aigency.tools.jobs.stop.{{tool.name}}";
pub const DEFAULT_TOPIC_JOB_UPDATE: &str = "aigency.tools.jobs.update";

/// Topic names used on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Shared announcement topic
    pub announce: String,
    /// Per-tool job request topic template
    pub job_new: String,
    /// Per-tool job stop topic template
    pub job_stop: String,
    /// Shared job update topic
    pub job_update: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            announce: DEFAULT_TOPIC_ANNOUNCE.to_string(),
            job_new: DEFAULT_TOPIC_JOB_NEW.to_string(),
            job_stop: DEFAULT_TOPIC_JOB_STOP.to_string(),
            job_update: DEFAULT_TOPIC_JOB_UPDATE.to_string(),
        }
    }
}

impl Topics {
    /// Topics under a custom prefix, e.g. `"acme.tools"`
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('.');
        Self {
            announce: format!("{prefix}.announce"),
            job_new: format!("{prefix}.jobs.new.{TOOL_NAME_PLACEHOLDER}"),
            job_stop: format!("{prefix}.jobs.stop.{TOOL_NAME_PLACEHOLDER}"),
            job_update: format!("{prefix}.jobs.update"),
        }
    }

    /// Job request topic for a tool
    pub fn job_new_for(&self, tool_name: &str) -> String {
        self.job_new.replace(TOOL_NAME_PLACEHOLDER, tool_name)
    }

    /// Job stop topic for a tool
    pub fn job_stop_for(&self, tool_name: &str) -> String {
        self.job_stop.replace(TOOL_NAME_PLACEHOLDER, tool_name)
    }
}

/// File produced by a job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub public_url: String,
}

impl FileDescriptor {
    pub fn new(
        description: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        local_path: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            local_path: local_path.into(),
            public_url: public_url.into(),
        }
    }
}

/// Announced tool descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<ParameterSchema>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub response_format: Vec<ParameterSchema>,
    #[serde(default)]
    pub version: String,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tool_type: default_tool_type(),
            parameters: Vec::new(),
            response_format: Vec::new(),
            version: String::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_response_field(mut self, field: ParameterSchema) -> Self {
        self.response_format.push(field);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_type(mut self, tool_type: impl Into<String>) -> Self {
        self.tool_type = tool_type.into();
        self
    }
}

/// Job request sent from the coordinator to a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub tool_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ExecutionArguments,
    #[serde(default)]
    pub mission_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub run_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobRequest {
    /// Best-effort job id from a payload that failed to decode
    pub fn recover_job_id(payload: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        value
            .get("job_id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
    }
}

/// Status update published by a tool for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_version: String,
    pub status: JobStatus,
    #[serde(default)]
    pub update_msg: String,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(
        rename = "new_result_data",
        alias = "new_result_texts",
        default,
        deserialize_with = "null_as_default"
    )]
    pub new_result_texts: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub new_result_files: Vec<FileDescriptor>,
    /// Monotonic per publisher; absent from older tool processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl JobUpdate {
    /// Update without results
    pub fn new(
        job_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: JobStatus,
        update_msg: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            tool_name: tool_name.into(),
            tool_version: String::new(),
            status,
            update_msg: update_msg.into(),
            submitted_at: now,
            updated_at: now,
            new_result_texts: Vec::new(),
            new_result_files: Vec::new(),
            sequence: None,
        }
    }

    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    pub fn with_texts(mut self, texts: Vec<String>) -> Self {
        self.new_result_texts = texts;
        self
    }

    pub fn with_files(mut self, files: Vec<FileDescriptor>) -> Self {
        self.new_result_files = files;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }
}

/// Treat an explicit `null` like a missing field
///
/// Tool processes written in Go encode nil slices and maps as `null`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Serialize a protocol message
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a protocol message
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}
