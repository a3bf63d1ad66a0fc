//! Read-only view of a session handed to its controller.

use chrono::{DateTime, Utc};

use super::state::{SessionId, SessionState};

/// Snapshot of one session.
///
/// Constructed `ACTIVE`; [`SessionRecord::finish`] consumes it and produces the
/// terminal snapshot, so a record can never leave a terminal state.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    id: SessionId,
    state: SessionState,
    failure_reason: Option<String>,
    message: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub(crate) fn active(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Active,
            failure_reason: None,
            message: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Terminal snapshot: `FAILED` iff any failure reason was recorded.
    pub(crate) fn finish(self, reasons: Vec<String>, message: String) -> Self {
        let (state, failure_reason) = if reasons.is_empty() {
            (SessionState::Done, None)
        } else {
            (SessionState::Failed, Some(reasons.join(", ")))
        };
        Self {
            state,
            failure_reason,
            message,
            finished_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accumulated failure reasons, comma-joined.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Free-text outcome message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_record_has_no_completion_time() {
        let rec = SessionRecord::active(SessionId::new("relay", 1));
        assert_eq!(rec.state(), SessionState::Active);
        assert!(rec.finished_at().is_none());
    }

    #[test]
    fn reasons_decide_terminal_state() {
        let done = SessionRecord::active(SessionId::new("relay", 1)).finish(vec![], "ok".into());
        assert_eq!(done.state(), SessionState::Done);
        assert!(done.finished_at().is_some());
        assert!(done.failure_reason().is_none());

        let failed = SessionRecord::active(SessionId::new("relay", 2))
            .finish(vec!["first".into(), "second".into()], String::new());
        assert_eq!(failed.state(), SessionState::Failed);
        assert_eq!(failed.failure_reason(), Some("first, second"));
        assert!(failed.finished_at().is_some());
    }
}
