//! # Request/response correlation over the bus.
//!
//! A caller publishes a request under a correlation key and waits for the
//! matching response, which a separate consumption loop observes later.
//!
//! ```text
//! Session                         CorrelationRegistry              ResponseDispatcher
//!   register(key) ───────────────► pending[key] = slot
//!   bus.publish(request)
//!   wait(timeout) ─┐                                         poll(response channel)
//!                  │              complete(key, value) ◄──────────────┘
//!                  │◄─── value ── remove pending[key]
//!                  └─ timeout ──► remove pending[key] (first remover wins)
//! ```
//!
//! ## Rules
//! - At most one pending request per key; a duplicate registration is rejected.
//! - Each pending request is removed exactly once: by `complete` or by the
//!   waiter giving up (timeout, interrupt, drop). The other side is a no-op.
//! - The registry lock is held only around map updates, never around a wait.

mod dispatcher;
mod registry;

pub use dispatcher::ResponseDispatcher;
pub use registry::{CorrelationRegistry, PendingResponse};
