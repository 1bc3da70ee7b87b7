//! Builder for creating pub/sub instances

use crate::config::PubSubConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};

use super::local::{DEFAULT_CAPACITY, LocalPubSub};
use super::traits::{MessageHandler, PubSub, PubSubBackend, SubscriptionHandle};

#[cfg(feature = "pubsub-nats")]
use super::nats::NatsPubSub;

/// Builder for creating pub/sub instances
#[derive(Debug, Clone)]
pub struct PubSubBuilder {
    mode: PubSubMode,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubMode {
    /// In-process only (always available)
    #[default]
    Local,

    /// NATS server (requires the `pubsub-nats` feature)
    Nats,
}

impl PubSubBuilder {
    pub fn new() -> Self {
        Self {
            mode: PubSubMode::Local,
            url: None,
            username: None,
            password: None,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Builder preloaded from configuration
    pub fn from_config(config: &PubSubConfig) -> Self {
        Self {
            mode: config.mode,
            url: Some(config.url.clone()),
            username: config.username.clone(),
            password: config.password.clone(),
            capacity: config.buffer_size,
        }
    }

    /// Use local-only pub/sub (default)
    pub fn local(mut self) -> Self {
        self.mode = PubSubMode::Local;
        self
    }

    /// Use a NATS server
    pub fn nats(mut self, url: impl Into<String>) -> Self {
        self.mode = PubSubMode::Nats;
        self.url = Some(url.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Per-topic buffer of the local backend
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Build the pub/sub instance
    ///
    /// Connection failures surface here; they are fatal at startup.
    pub async fn build(self) -> Result<PubSubInstance> {
        match self.mode {
            PubSubMode::Local => Ok(PubSubInstance::Local(LocalPubSub::with_capacity(
                self.capacity,
            ))),

            #[cfg(feature = "pubsub-nats")]
            PubSubMode::Nats => {
                let url = self.url.ok_or_else(|| {
                    crate::error::ToolbusError::Configuration("NATS mode requires URL".to_string())
                })?;
                Ok(PubSubInstance::Nats(
                    NatsPubSub::connect(&url, self.username.as_deref(), self.password.as_deref())
                        .await?,
                ))
            }

            #[cfg(not(feature = "pubsub-nats"))]
            PubSubMode::Nats => Err(super::error::PubSubError::NatsNotAvailable.into()),
        }
    }
}

impl Default for PubSubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Enum wrapper for different pub/sub implementations
#[derive(Debug)]
pub enum PubSubInstance {
    Local(LocalPubSub),
    #[cfg(feature = "pubsub-nats")]
    Nats(NatsPubSub),
}

#[async_trait::async_trait]
impl PubSub for PubSubInstance {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        match self {
            PubSubInstance::Local(inner) => inner.publish(topic, payload).await,
            #[cfg(feature = "pubsub-nats")]
            PubSubInstance::Nats(inner) => inner.publish(topic, payload).await,
        }
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle> {
        match self {
            PubSubInstance::Local(inner) => inner.subscribe(topic, handler).await,
            #[cfg(feature = "pubsub-nats")]
            PubSubInstance::Nats(inner) => inner.subscribe(topic, handler).await,
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            PubSubInstance::Local(inner) => inner.is_distributed(),
            #[cfg(feature = "pubsub-nats")]
            PubSubInstance::Nats(inner) => inner.is_distributed(),
        }
    }

    fn backend_type(&self) -> PubSubBackend {
        match self {
            PubSubInstance::Local(inner) => inner.backend_type(),
            #[cfg(feature = "pubsub-nats")]
            PubSubInstance::Nats(inner) => inner.backend_type(),
        }
    }
}
