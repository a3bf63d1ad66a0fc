use tokio_util::sync::CancellationToken;

use super::state::SessionId;

/// Per-session execution context.
///
/// Owned exclusively by the running session. Carries the two controller
/// signals and accumulates the outcome.
pub struct SessionContext {
    id: SessionId,
    stopping: CancellationToken,
    interrupt: CancellationToken,
    reasons: Vec<String>,
    message: String,
}

impl SessionContext {
    pub(crate) fn new(id: SessionId, stopping: CancellationToken, interrupt: CancellationToken) -> Self {
        Self {
            id,
            stopping,
            interrupt,
            reasons: Vec::new(),
            message: String::new(),
        }
    }

    /// Standalone context, for running a session outside a controller.
    pub fn detached(id: SessionId) -> Self {
        Self::new(id, CancellationToken::new(), CancellationToken::new())
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Cancelled when the owning controller stops accepting work.
    ///
    /// Long-lived sessions (consumption loops) exit cleanly when it fires.
    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Cancelled when the session must give up blocking waits.
    pub fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// Appends a failure reason; the session will end `FAILED`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub(crate) fn into_outcome(self) -> (Vec<String>, String) {
        (self.reasons, self.message)
    }
}
