//! # LogWriter: lifecycle events through `tracing`
//!
//! Failures and stop timeouts are logged at `warn`, everything else at `info`
//! or `debug`.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that renders every event as a structured `tracing` record.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let controller = e.controller.as_deref().unwrap_or("-");
        let session = e.session.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ControllerStarted => info!(controller, "controller started"),
            EventKind::ControllerStopping => info!(controller, "controller stopping"),
            EventKind::ControllerStopped => info!(controller, reason, "controller stopped"),
            EventKind::StopTimeout => {
                warn!(controller, wait_ms = ?e.delay_ms, "controller did not stop in time")
            }
            EventKind::SessionStarted => debug!(controller, session, "session started"),
            EventKind::SessionDone => debug!(controller, session, message = reason, "session done"),
            EventKind::SessionFailed => warn!(controller, session, reason, "session failed"),
            EventKind::StatusNotifyFailed => {
                warn!(controller, session, reason, "status notification failed")
            }
            EventKind::SourceFailed => {
                warn!(controller, reason, failures = ?e.attempt, "work source failed")
            }
            EventKind::BackoffScheduled => {
                debug!(controller, delay_ms = ?e.delay_ms, failures = ?e.attempt, "retry scheduled")
            }
            EventKind::OrphanResponse => {
                warn!(dispatcher = controller, key = session, "no pending request for response")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
