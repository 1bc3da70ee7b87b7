//! Error types for pub/sub operations

use crate::error::ToolbusError;
use thiserror::Error;

/// Pub/sub specific errors
#[derive(Debug, Error)]
pub enum PubSubError {
    /// General pub/sub error
    #[error("Pub/sub error: {0}")]
    PubSub(String),

    /// Could not reach the broker
    #[error("Connection error: {0}")]
    Connection(String),

    /// NATS backend not compiled in
    #[error("NATS backend not available (feature `pubsub-nats` missing)")]
    NatsNotAvailable,

    /// Invalid topic name
    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),
}

impl From<PubSubError> for ToolbusError {
    fn from(err: PubSubError) -> Self {
        match err {
            PubSubError::PubSub(msg) => ToolbusError::PubSub(msg),
            PubSubError::Connection(msg) => {
                ToolbusError::PubSub(format!("connection error: {}", msg))
            }
            PubSubError::NatsNotAvailable => {
                ToolbusError::Configuration("NATS pub/sub not available".to_string())
            }
            PubSubError::InvalidTopic(msg) => {
                ToolbusError::Configuration(format!("Invalid topic: {}", msg))
            }
        }
    }
}

pub(crate) fn check_topic(topic: &str) -> Result<(), PubSubError> {
    if topic.trim().is_empty() {
        return Err(PubSubError::InvalidTopic(
            "Topic name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
