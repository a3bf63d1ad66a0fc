use std::fmt;
use std::sync::Arc;

/// Session state. Moves from `Active` to exactly one terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Active,
    Done,
    Failed,
}

impl SessionState {
    /// All states, in counter order.
    pub const ALL: [SessionState; 3] = [SessionState::Active, SessionState::Done, SessionState::Failed];

    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }

    /// Stable index into per-state counters.
    pub(crate) fn index(self) -> usize {
        match self {
            SessionState::Active => 0,
            SessionState::Done => 1,
            SessionState::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "ACTIVE",
            SessionState::Done => "DONE",
            SessionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session identity: type tag plus per-controller sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    kind: Arc<str>,
    seq: u64,
}

impl SessionId {
    pub fn new(kind: impl Into<Arc<str>>, seq: u64) -> Self {
        Self {
            kind: kind.into(),
            seq,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.seq)
    }
}
