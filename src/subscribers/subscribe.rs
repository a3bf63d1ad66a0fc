//! # Subscriber contract
//!
//! Each subscriber is driven by its own worker task fed by a bounded queue
//! owned by the [`SubscriberSet`](crate::SubscriberSet). Slow subscribers
//! delay nobody but themselves; on overflow their events are dropped.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
