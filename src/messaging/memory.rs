//! # In-process bus
//!
//! One [`tokio::sync::broadcast`] channel per bus channel, created lazily on
//! first publish or subscribe. Every subscription sees every record published
//! after it subscribed.
//!
//! ## Rules
//! - Publishing to a channel nobody consumes is acknowledged and dropped.
//! - A subscription that falls more than `capacity` records behind skips the
//!   oldest ones and logs how many were lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use super::{BusRecord, MessageBus, Subscription};
use crate::clock;
use crate::error::BusError;

const MAX_BATCH: usize = 500;

/// In-memory [`MessageBus`].
pub struct MemoryBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<BusRecord>>>,
}

impl MemoryBus {
    /// Creates a bus whose channels buffer up to `capacity` records per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<BusRecord> {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes a record with an explicit bus timestamp.
    pub fn publish_at(&self, channel: &str, key: &str, value: &str, timestamp_ms: i64) {
        let record = BusRecord {
            channel: Arc::from(channel),
            key: key.to_string(),
            value: value.to_string(),
            timestamp_ms,
        };
        let _ = self.sender(channel).send(record);
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, key: &str, value: &str) -> Result<(), BusError> {
        self.publish_at(channel, key, value, clock::now_ms());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError> {
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx: self.sender(channel).subscribe(),
        }))
    }

    fn describe(&self) -> String {
        format!("in-memory bus, {} channel(s)", self.channels.lock().len())
    }
}

struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<BusRecord>,
}

impl MemorySubscription {
    fn closed(&self) -> BusError {
        BusError::Closed {
            channel: self.channel.clone(),
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BusRecord>, BusError> {
        let mut batch = Vec::new();

        let first = loop {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_elapsed) => return Ok(batch),
                Ok(Ok(record)) => break record,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(channel = %self.channel, skipped, "subscription lagged");
                }
                Ok(Err(RecvError::Closed)) => return Err(self.closed()),
            }
        };
        batch.push(first);

        while batch.len() < MAX_BATCH {
            match self.rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscription lagged");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => break,
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn poll_returns_empty_batch_on_timeout() {
        let bus = MemoryBus::new(16);
        let mut sub = bus.subscribe("idle").await.unwrap();
        let batch = sub.poll(Duration::from_millis(200)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn poll_drains_everything_published_so_far() {
        let bus = MemoryBus::new(16);
        let mut sub = bus.subscribe("gate").await.unwrap();
        for i in 0..3 {
            bus.publish("gate", &format!("k{i}"), "v").await.unwrap();
        }
        bus.publish("other", "x", "v").await.unwrap();

        let batch = sub.poll(Duration::from_millis(50)).await.unwrap();
        let keys: Vec<_> = batch.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2"]);
        assert!(batch.iter().all(|r| &*r.channel == "gate"));
    }

    #[tokio::test]
    async fn lagging_subscription_keeps_newest_records() {
        let bus = MemoryBus::new(2);
        let mut sub = bus.subscribe("burst").await.unwrap();
        for i in 0..5 {
            bus.publish_at("burst", &format!("k{i}"), "v", i);
        }
        let batch = sub.poll(Duration::from_millis(50)).await.unwrap();
        let keys: Vec<_> = batch.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k3", "k4"]);
    }
}
