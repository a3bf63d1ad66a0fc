//! # Execution mode
//!
//! How a controller runs the sessions its source produces.
//!
//! - `Sequential`: one session at a time; the source is not asked for more
//!   work until the current session finished. Periodic probes use this so a
//!   slow probe never overlaps the next one.
//! - `Concurrent`: one task per session. `max = 0` means unbounded; `max > 0`
//!   caps in-flight sessions with a semaphore and applies backpressure to the
//!   source loop (it waits for a permit before spawning).

/// Policy controlling how sessions of one controller relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run each session to completion before taking the next work item.
    Sequential,

    /// Run sessions as independent tasks.
    Concurrent {
        /// In-flight limit (`0` = unlimited).
        max: usize,
    },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Concurrent { max: 0 }
    }
}
