//! # Lifecycle events.
//!
//! The [`EventKind`] enum classifies what happened:
//! - **Controller events**: starting, stopping, stopped, refusing to stop
//! - **Session events**: started, done, failed, status notification lost
//! - **Plumbing events**: work source failures, retry scheduling, orphan responses
//!
//! Each event has a global monotonically increasing `seq`; use it to restore
//! order when subscribers see events out of order.
//!
//! ## Example
//! ```rust
//! use tos_mediator::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::SessionFailed)
//!     .with_controller("flow-gate-in")
//!     .with_session("flow-gate-in#7")
//!     .with_reason("transport failure: connection refused");
//!
//! assert_eq!(ev.kind, EventKind::SessionFailed);
//! assert_eq!(ev.session.as_deref(), Some("flow-gate-in#7"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Controller entered `RUNNING`.
    ///
    /// Sets: `controller`
    ControllerStarted,

    /// Controller stop was requested; no new sessions are accepted.
    ///
    /// Sets: `controller`
    ControllerStopping,

    /// Controller loop exited and its sessions were drained.
    ///
    /// Sets: `controller`, `reason` (when sessions had to be interrupted)
    ControllerStopped,

    /// Controller did not stop within the manager's bounded wait.
    ///
    /// Sets: `controller`, `delay_ms` (the wait that expired)
    StopTimeout,

    /// A session was admitted and is running.
    ///
    /// Sets: `controller`, `session`
    SessionStarted,

    /// A session finished `DONE`.
    ///
    /// Sets: `controller`, `session`, `reason` (outcome message, if any)
    SessionDone,

    /// A session finished `FAILED`.
    ///
    /// Sets: `controller`, `session`, `reason` (accumulated failure reason)
    SessionFailed,

    /// Best-effort status notification of a session failed.
    ///
    /// Sets: `controller`, `session`, `reason`
    StatusNotifyFailed,

    /// Work source failed to produce work.
    ///
    /// Sets: `controller`, `reason`, `attempt` (consecutive failures)
    SourceFailed,

    /// Next poll of a failed source is scheduled.
    ///
    /// Sets: `controller`, `delay_ms`, `attempt`
    BackoffScheduled,

    /// A response arrived for which no request is pending.
    ///
    /// Sets: `controller` (dispatcher name), `session` (correlation key)
    OrphanResponse,
}

/// Lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Controller or dispatcher name.
    pub controller: Option<Arc<str>>,
    /// Session id or correlation key.
    pub session: Option<Arc<str>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Delay or wait in milliseconds.
    pub delay_ms: Option<u32>,
    /// Attempt or failure count.
    pub attempt: Option<u32>,
}

impl Event {
    /// Creates an event of the given kind with the current time and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            controller: None,
            session: None,
            reason: None,
            delay_ms: None,
            attempt: None,
        }
    }

    #[inline]
    pub fn with_controller(mut self, name: impl Into<Arc<str>>) -> Self {
        self.controller = Some(name.into());
        self
    }

    #[inline]
    pub fn with_session(mut self, id: impl Into<Arc<str>>) -> Self {
        self.session = Some(id.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }
}
