//! Pub/sub transport
//!
//! This module provides a byte-oriented pub/sub abstraction with:
//! - Local-only pub/sub over tokio broadcast channels (in-process)
//! - NATS pub/sub for multi-process deployments (feature `pubsub-nats`)

mod builder;
mod error;
mod local;
mod message;
mod traits;

#[cfg(feature = "pubsub-nats")]
mod nats;

pub use builder::{PubSubBuilder, PubSubInstance, PubSubMode};
pub use error::PubSubError;
pub use local::{DEFAULT_CAPACITY, LocalPubSub};
pub use message::PubSubMessage;
pub use traits::{
    MessageHandler, PubSub, PubSubBackend, PubSubExt, SharedPubSub, SubscriptionHandle, handler,
};

#[cfg(feature = "pubsub-nats")]
pub use nats::NatsPubSub;
