// MIT License - Copyright (c) 2026 Peter Wright
// Command relay: topic-based pub/sub between the registry and live connections

pub mod memory;
pub mod mqtt;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryRelay;
pub use mqtt::{MqttRelay, MqttRelayOptions};

/// Decouples whoever issues commands or removals from whichever process
/// holds the live connection.
///
/// Each published message is delivered to at most one subscriber of its
/// topic. A message with a TTL that nobody receives in time is discarded.
#[async_trait]
pub trait CommandRelay: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<RelaySubscription>;
}

/// Where a subscription's messages come from.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Next message, or `None` once the relay has shut down.
    ///
    /// Must be cancel safe: dropping the future before it completes must
    /// not lose a message.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// A live subscription to one topic. Dropping it detaches from the topic.
pub struct RelaySubscription {
    topic: String,
    source: Box<dyn SubscriptionSource>,
}

impl RelaySubscription {
    pub fn new(topic: impl Into<String>, source: Box<dyn SubscriptionSource>) -> Self {
        Self {
            topic: topic.into(),
            source,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.source.recv().await
    }
}

impl std::fmt::Debug for RelaySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySubscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
