//! NATS pub/sub implementation
//!
//! Core NATS publish/subscribe: at-most-once, no persistence. Topics map
//! directly onto subjects.

use crate::error::Result;
use crate::pubsub::error::{PubSubError, check_topic};
use crate::pubsub::message::PubSubMessage;
use crate::pubsub::traits::{MessageHandler, PubSub, PubSubBackend, SubscriptionHandle};
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Pub/sub over a NATS connection
#[derive(Clone)]
pub struct NatsPubSub {
    client: async_nats::Client,
    url: String,
}

impl NatsPubSub {
    /// Connect, optionally with user/password credentials
    pub async fn connect(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let options = match (username, password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                async_nats::ConnectOptions::with_user_and_password(user.to_string(), pass.to_string())
            }
            _ => async_nats::ConnectOptions::new(),
        };

        let client = options.connect(url).await.map_err(|e| {
            PubSubError::Connection(format!("Failed to connect to NATS at {}: {}", url, e))
        })?;
        tracing::info!(url = %url, "connected to NATS");

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for NatsPubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsPubSub").field("url", &self.url).finish()
    }
}

#[async_trait]
impl PubSub for NatsPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        check_topic(topic)?;
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| PubSubError::PubSub(format!("Failed to publish to {}: {}", topic, e)))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle> {
        check_topic(topic)?;

        let mut subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| PubSubError::PubSub(format!("Failed to subscribe to {}: {}", topic, e)))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = subscriber.next() => next,
                };
                let Some(message) = next else { break };
                let message = PubSubMessage::new(message.subject.to_string(), message.payload.to_vec());
                if let Err(e) = handler(message).await {
                    tracing::warn!(topic = %topic_name, error = %e, "handler failed");
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                tracing::debug!(topic = %topic_name, error = %e, "unsubscribe failed");
            }
            tracing::debug!(topic = %topic_name, "subscription closed");
        });

        Ok(SubscriptionHandle::new(topic, cancel))
    }

    fn is_distributed(&self) -> bool {
        true
    }

    fn backend_type(&self) -> PubSubBackend {
        PubSubBackend::Nats
    }
}
