//! Configuration types for Toolbus
//!
//! Loaded with figment in this order, later layers overriding earlier ones:
//! 1. Built-in defaults
//! 2. `toolbus.toml` in the working directory
//! 3. The file named by `TOOLBUS_CONFIG_PATH`
//! 4. `TOOLBUS_*` environment variables, nested with `__`
//!    (e.g. `TOOLBUS_COORDINATOR__TOOL_TTL=90s`)

use crate::error::{Result, ToolbusError};
use crate::jobs::DEFAULT_UPDATE_BUFFER;
use crate::protocol::{TOOL_NAME_PLACEHOLDER, Topics};
use crate::pubsub::{DEFAULT_CAPACITY, PubSubMode};
use crate::tools::DEFAULT_ANNOUNCE_INTERVAL;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for Toolbus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolbusConfig {
    /// Transport selection and credentials
    pub pubsub: PubSubConfig,

    /// Topic names
    pub topics: Topics,

    /// Registry and job store tuning
    pub coordinator: CoordinatorConfig,

    /// Tool worker tuning
    pub worker: WorkerConfig,
}

/// Pub/sub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Pub/sub mode
    pub mode: PubSubMode,

    /// Broker URL (NATS mode)
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Per-topic buffer of the local backend
    pub buffer_size: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            mode: PubSubMode::Local,
            url: "nats://127.0.0.1:4222".to_string(),
            username: None,
            password: None,
            buffer_size: DEFAULT_CAPACITY,
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Silence after which a tool is evicted; must exceed the announce interval
    #[serde(with = "humantime_serde")]
    pub tool_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub tool_prune_interval: Duration,

    /// How long an ended job stays queryable
    #[serde(with = "humantime_serde")]
    pub job_retention: Duration,

    #[serde(with = "humantime_serde")]
    pub job_prune_interval: Duration,

    /// Wait after a stop request before forcing `Cancelled`
    #[serde(with = "humantime_serde")]
    pub stop_grace_period: Duration,

    /// Capacity of each job's update channel
    pub update_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tool_ttl: Duration::from_secs(61),
            tool_prune_interval: Duration::from_secs(30),
            job_retention: Duration::from_secs(300),
            job_prune_interval: Duration::from_secs(60),
            stop_grace_period: Duration::from_secs(30),
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }
}

/// Tool worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(with = "humantime_serde")]
    pub announce_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
        }
    }
}

impl ToolbusConfig {
    /// Load configuration from files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is malformed or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        let mut figment = Self::base().merge(Toml::file("toolbus.toml"));

        if let Ok(path) = std::env::var("TOOLBUS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment.merge(Env::prefixed("TOOLBUS_").split("__")))
    }

    /// Load configuration from a specific TOML file, without env overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ToolbusError::Configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        Self::extract(Self::base().merge(Toml::file(path)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::extract(Self::base().merge(Toml::string(toml)))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(ToolbusConfig::default()))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: ToolbusConfig = figment.extract().map_err(|e| {
            ToolbusError::Configuration(format!("Failed to load configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let coordinator = &self.coordinator;

        let intervals = [
            ("coordinator.tool_ttl", coordinator.tool_ttl),
            ("coordinator.tool_prune_interval", coordinator.tool_prune_interval),
            ("coordinator.job_prune_interval", coordinator.job_prune_interval),
            ("worker.announce_interval", self.worker.announce_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ToolbusError::Configuration(format!("{} must be non-zero", name)));
        }

        if coordinator.tool_ttl <= self.worker.announce_interval {
            return Err(ToolbusError::Configuration(format!(
                "coordinator.tool_ttl ({}) must exceed worker.announce_interval ({})",
                humantime_serde::re::humantime::format_duration(coordinator.tool_ttl),
                humantime_serde::re::humantime::format_duration(self.worker.announce_interval),
            )));
        }

        if coordinator.update_buffer == 0 || self.pubsub.buffer_size == 0 {
            return Err(ToolbusError::Configuration(
                "channel buffers must hold at least one message".to_string(),
            ));
        }

        for (name, template) in [
            ("topics.job_new", &self.topics.job_new),
            ("topics.job_stop", &self.topics.job_stop),
        ] {
            if !template.contains(TOOL_NAME_PLACEHOLDER) {
                return Err(ToolbusError::Configuration(format!(
                    "{} must contain {}",
                    name, TOOL_NAME_PLACEHOLDER
                )));
            }
        }
        for (name, topic) in [
            ("topics.announce", &self.topics.announce),
            ("topics.job_update", &self.topics.job_update),
        ] {
            if topic.trim().is_empty() {
                return Err(ToolbusError::Configuration(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }
}
