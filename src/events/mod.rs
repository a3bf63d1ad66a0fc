//! Lifecycle events published by controllers, sessions and the manager.
//!
//! ## Contents
//! - [`EventKind`] classification of lifecycle events
//! - [`Event`] event payload with metadata (seq, timestamps, names, reason)
//! - [`EventBus`] broadcast channel for publishing and subscribing to events
//!
//! ## Flow
//! ```text
//! Controller / Session runner / Dispatcher / Manager
//!          └─► EventBus::publish(Event)
//!                 └─► Manager fan-out listener ─► SubscriberSet ─► LogWriter, ...
//! ```

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, EventKind};
