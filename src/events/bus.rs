//! # Broadcast channel for lifecycle events.
//!
//! [`EventBus`] wraps [`tokio::sync::broadcast`]; publishing never blocks.
//!
//! ## Rules
//! - Capacity is shared by all receivers and clamped to at least 1.
//! - Slow receivers observe `RecvError::Lagged(n)` and skip the `n` oldest events.
//! - Events published while nobody listens are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Fire-and-forget broadcast of [`Event`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
