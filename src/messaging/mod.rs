//! # Message bus contract.
//!
//! The mediator talks to both systems over a keyed, channel-oriented message
//! bus. Only its external contract matters here:
//!
//! - `publish(channel, key, value)` resolves once the bus acknowledged the record;
//! - `subscribe(channel)` yields a [`Subscription`] whose `poll(timeout)` returns a
//!   batch of [`BusRecord`]s, or an empty batch when the timeout elapses, so
//!   consumption loops can observe a stop signal promptly.
//!
//! [`MemoryBus`] is an in-process implementation used by the binary and by tests.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BusError;

pub use memory::MemoryBus;

/// One record observed on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusRecord {
    /// Channel the record was published on.
    pub channel: Arc<str>,
    /// Business or correlation key.
    pub key: String,
    /// Payload.
    pub value: String,
    /// Bus timestamp (epoch ms).
    pub timestamp_ms: i64,
}

/// Keyed publish/subscribe bus.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes one record; `Ok` is the acknowledgement.
    async fn publish(&self, channel: &str, key: &str, value: &str) -> Result<(), BusError>;

    /// Starts consuming `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Short human-readable description for reports.
    fn describe(&self) -> String;
}

/// Consumer side of one channel.
#[async_trait]
pub trait Subscription: Send + 'static {
    /// Channel name.
    fn channel(&self) -> &str;

    /// Waits up to `timeout` for records; returns an empty batch on timeout.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BusRecord>, BusError>;
}
