// MIT License - Copyright (c) 2026 Peter Wright
// In-process relay: per-topic work queues

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::{CommandRelay, RelaySubscription, SubscriptionSource};
use crate::error::Result;

struct Queued {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Queued {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

#[derive(Default)]
struct TopicQueue {
    messages: Mutex<VecDeque<Queued>>,
    notify: Notify,
}

impl TopicQueue {
    /// Pop the oldest message that hasn't expired, discarding expired ones.
    async fn pop_live(&self, topic: &str) -> Option<Vec<u8>> {
        let mut messages = self.messages.lock().await;
        let now = Instant::now();
        while let Some(msg) = messages.pop_front() {
            if msg.is_live(now) {
                return Some(msg.payload);
            }
            debug!("Discarding expired message on {}", topic);
        }
        None
    }
}

/// Relay for a single process.
///
/// Messages wait in their topic's queue until a subscriber takes them.
/// Subscribers pull, so each message reaches exactly one of them; idle
/// subscribers are woken in the order they started waiting.
#[derive(Default, Clone)]
pub struct MemoryRelay {
    topics: Arc<DashMap<String, Arc<TopicQueue>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> Arc<TopicQueue> {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Discard expired messages nobody took, and forget topics that have
    /// neither messages nor subscribers.
    fn prune(&self) {
        let now = Instant::now();
        self.topics.retain(|topic, queue| {
            if Arc::strong_count(queue) > 1 {
                return true;
            }
            match queue.messages.try_lock() {
                Ok(mut messages) => {
                    let before = messages.len();
                    messages.retain(|m| m.is_live(now));
                    if messages.len() < before {
                        debug!("Pruned {} expired messages on {}", before - messages.len(), topic);
                    }
                    !messages.is_empty()
                }
                Err(_) => true,
            }
        });
    }

    /// Number of messages waiting on a topic, expired ones included.
    pub async fn queued(&self, topic: &str) -> usize {
        match self.topics.get(topic).map(|q| q.value().clone()) {
            Some(queue) => queue.messages.lock().await.len(),
            None => 0,
        }
    }
}

#[async_trait]
impl CommandRelay for MemoryRelay {
    async fn publish(&self, topic: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.prune();
        let queue = self.topic(topic);
        let now = Instant::now();
        {
            let mut messages = queue.messages.lock().await;
            messages.retain(|m| m.is_live(now));
            messages.push_back(Queued {
                payload,
                expires_at: ttl.map(|ttl| now + ttl),
            });
        }
        queue.notify.notify_one();
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<RelaySubscription> {
        let source = MemorySource {
            topic: topic.to_string(),
            queue: self.topic(topic),
        };
        Ok(RelaySubscription::new(topic, Box::new(source)))
    }
}

struct MemorySource {
    topic: String,
    queue: Arc<TopicQueue>,
}

#[async_trait]
impl SubscriptionSource for MemorySource {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(payload) = self.queue.pop_live(&self.topic).await {
                // Another message may be waiting for another subscriber
                self.queue.notify.notify_one();
                return Some(payload);
            }
            notified.await;
        }
    }
}
