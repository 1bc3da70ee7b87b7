//! Message envelope handed to subscription handlers

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// A message as delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubMessage {
    /// Topic the message was published on
    pub topic: String,

    /// Raw body, JSON for every protocol message except job stops
    pub payload: Vec<u8>,

    /// Local id, useful for log correlation only
    pub message_id: Uuid,

    pub received_at: DateTime<Utc>,
}

impl PubSubMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            message_id: Uuid::new_v4(),
            received_at: Utc::now(),
        }
    }

    /// Decode the payload as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        crate::protocol::decode(&self.payload)
    }

    /// Payload as UTF-8 text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
