//! # Sessions: one unit of asynchronous work.
//!
//! A [`Session`] only says what its work is (`execute`) and, optionally, how to
//! announce its outcome (`notify_status`). Lifecycle and bookkeeping are shared
//! and live in [`run_session`]:
//!
//! ```text
//! admit ─► SessionRecord{ACTIVE} in controller's live map
//!   │
//!   ▼
//! execute(ctx) ──Ok──────────────┐
//!   ├─Err(e) ─► ctx.fail(e) ─────┤
//!   ├─panic  ─► ctx.fail(panic) ─┤
//!   └─interrupt ─► Canceled ─────┤
//!                                ▼
//!          finish: DONE if no failure recorded, else FAILED; finished_at = now
//!                                │
//!          notify_status(record) (best effort, errors only logged)
//!                                │
//!          owner.session_ended(record)   exactly once
//! ```
//!
//! ## Rules
//! - State is `ACTIVE` until `execute` returns, then `DONE` or `FAILED` forever.
//! - `finished_at` is set iff the state is terminal.
//! - Failure reasons are append-only and joined with `", "`.

mod context;
mod history;
mod record;
mod runner;
mod state;

use async_trait::async_trait;

use crate::error::SessionError;

pub use context::SessionContext;
pub use history::SessionHistory;
pub use record::SessionRecord;
pub use runner::{SessionOwner, run_session};
pub use state::{SessionId, SessionState};

/// One unit of work run by a controller.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Performs the work. Returning `Err` or calling [`SessionContext::fail`]
    /// both end the session `FAILED`.
    async fn execute(&self, ctx: &mut SessionContext) -> Result<(), SessionError>;

    /// Best-effort outcome announcement, called after the terminal state is set.
    ///
    /// Errors are logged and never change the session's state.
    async fn notify_status(&self, _record: &SessionRecord) -> Result<(), SessionError> {
        Ok(())
    }
}
