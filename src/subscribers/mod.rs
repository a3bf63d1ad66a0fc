//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for observing lifecycle events;
//! [`SubscriberSet`] fans each event out to every subscriber without waiting
//! on any of them. [`LogWriter`] renders events through `tracing`.
//!
//! ```text
//! EventBus ──► Manager fan-out listener ──► SubscriberSet::emit(&Event)
//!                                              ├──► [queue] ─► LogWriter
//!                                              └──► [queue] ─► custom (alerts, dashboards)
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
