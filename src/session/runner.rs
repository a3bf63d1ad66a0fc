//! # Run one session to its terminal state.
//!
//! ## Rules
//! - Exactly one call to [`SessionOwner::session_ended`] per run.
//! - `Err` from `execute`, a panic inside it, or the interrupt token all
//!   become failure reasons; none of them escape to the caller.
//! - `notify_status` runs after the terminal state is fixed; its error is
//!   logged and reported to the owner but cannot change the state.

use std::any::Any;

use futures::FutureExt;
use tracing::{debug, warn};

use super::{Session, SessionContext, SessionRecord};
use crate::error::SessionError;

/// Receives finished sessions.
pub trait SessionOwner: Send + Sync {
    /// Single entry point through which a finished session reaches its owner.
    fn session_ended(&self, record: SessionRecord);

    /// Status notification of `record` failed.
    fn notify_failed(&self, _record: &SessionRecord, _error: &SessionError) {}
}

/// Executes `session` and hands the terminal record to `owner`.
pub async fn run_session(
    session: &dyn Session,
    record: SessionRecord,
    mut ctx: SessionContext,
    owner: &dyn SessionOwner,
) -> SessionRecord {
    let interrupt = ctx.interrupt().clone();

    let outcome = {
        let work = std::panic::AssertUnwindSafe(session.execute(&mut ctx)).catch_unwind();
        tokio::select! {
            res = work => res,
            _ = interrupt.cancelled() => Ok(Err(SessionError::Canceled)),
        }
    };

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(session = %record.id(), label = e.as_label(), "session execute failed");
            ctx.fail(e.to_string());
        }
        Err(panic) => ctx.fail(format!("panicked: {}", panic_message(panic.as_ref()))),
    }

    let (reasons, message) = ctx.into_outcome();
    let record = record.finish(reasons, message);

    if let Err(e) = session.notify_status(&record).await {
        warn!(session = %record.id(), error = %e, "status notification failed");
        owner.notify_failed(&record, &e);
    }

    owner.session_ended(record.clone());
    record
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
