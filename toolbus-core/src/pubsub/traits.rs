//! Core pub/sub trait definitions

use super::message::PubSubMessage;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Callback invoked for every message delivered on a subscription
pub type MessageHandler = Arc<dyn Fn(PubSubMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(func: F) -> MessageHandler
where
    F: Fn(PubSubMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(func(message)))
}

/// Topic-based, fire-and-forget transport
///
/// Delivery is best effort: a message published while nobody listens is
/// lost, and backends may drop messages for subscribers that fall behind.
/// Handler errors are logged by the backend and never end the subscription.
#[async_trait]
pub trait PubSub: Send + Sync + Debug {
    /// Publish raw bytes to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic with a message handler
    ///
    /// The subscription is active when this returns.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle>;

    /// Whether messages leave the process
    fn is_distributed(&self) -> bool;

    /// Get backend type for debugging/monitoring
    fn backend_type(&self) -> PubSubBackend;
}

/// Shared transport handle
pub type SharedPubSub = Arc<dyn PubSub>;

/// JSON convenience on top of any [`PubSub`]
#[async_trait]
pub trait PubSubExt: PubSub {
    async fn publish_json<M>(&self, topic: &str, message: &M) -> Result<()>
    where
        M: Serialize + Sync,
    {
        let payload = crate::protocol::encode(message)?;
        self.publish(topic, payload).await
    }
}

impl<T: PubSub + ?Sized> PubSubExt for T {}

/// Handle to a subscription (can be used to unsubscribe)
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    topic: String,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub(crate) fn new(topic: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            cancel,
        }
    }

    /// Get the subscription ID
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Get the topic name
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop delivering messages to the handler
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

/// Backend type for monitoring/debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubBackend {
    /// In-process broadcast channels
    Local,
    /// NATS server
    Nats,
}

impl std::fmt::Display for PubSubBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PubSubBackend::Local => write!(f, "local"),
            PubSubBackend::Nats => write!(f, "nats"),
        }
    }
}
