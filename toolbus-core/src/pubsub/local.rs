//! Local pub/sub implementation over tokio broadcast channels
//!
//! One bounded channel per topic. Publishing never waits: a topic nobody
//! listens to swallows the message, and a subscriber that falls more than
//! `capacity` messages behind loses the oldest ones.

use crate::error::Result;
use crate::pubsub::error::check_topic;
use crate::pubsub::message::PubSubMessage;
use crate::pubsub::traits::{MessageHandler, PubSub, PubSubBackend, SubscriptionHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

/// Default per-topic buffer
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process pub/sub
#[derive(Debug, Clone)]
pub struct LocalPubSub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<PubSubMessage>>>>,
    capacity: usize,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Live subscriptions on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<PubSubMessage> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        check_topic(topic)?;

        let topics = self.topics.read().await;
        if let Some(sender) = topics.get(topic) {
            // Err only means nobody is listening right now
            if sender.send(PubSubMessage::new(topic, payload)).is_err() {
                tracing::trace!(topic = %topic, "published with no subscribers");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle> {
        check_topic(topic)?;

        let mut receiver = self.sender(topic).await.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => received,
                };
                match message {
                    Ok(message) => {
                        if let Err(e) = handler(message).await {
                            tracing::warn!(topic = %topic_name, error = %e, "handler failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            topic = %topic_name,
                            skipped,
                            "subscriber lagging, oldest messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(topic = %topic_name, "subscription closed");
        });

        Ok(SubscriptionHandle::new(topic, cancel))
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn backend_type(&self) -> PubSubBackend {
        PubSubBackend::Local
    }
}
