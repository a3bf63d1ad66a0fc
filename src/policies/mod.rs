//! Retry pacing for work sources and consumption loops.
//!
//! A failing source (bus unreachable, subscription closed) never ends its
//! controller; the loop waits according to these policies and polls again.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//!
//! ## Wiring
//! ```text
//! Controller::run loop
//!   source.next() ─► Err ─► delay = backoff.next(failures) ─► sleep (stop-aware)
//!                └─► Ok  ─► failures = 0
//! ```

mod backoff;
mod jitter;

pub(crate) use backoff::millis;
pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
