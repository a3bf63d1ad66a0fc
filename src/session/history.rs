//! Bounded, newest-first record of finished sessions.

use std::collections::VecDeque;

use super::record::SessionRecord;

/// Newest-first ring of finished sessions.
///
/// Inserting beyond capacity evicts the oldest; shrinking the capacity evicts
/// immediately.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    capacity: usize,
    entries: VecDeque<SessionRecord>,
}

impl SessionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, record: SessionRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.entries.truncate(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recently finished session.
    pub fn latest(&self) -> Option<&SessionRecord> {
        self.entries.front()
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.entries.iter()
    }

    /// Newest-first copy.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    fn finished(seq: u64) -> SessionRecord {
        SessionRecord::active(SessionId::new("canary", seq)).finish(vec![], String::new())
    }

    fn seqs(h: &SessionHistory) -> Vec<u64> {
        h.iter().map(|r| r.id().seq()).collect()
    }

    #[test]
    fn keeps_three_most_recent_newest_first() {
        let mut h = SessionHistory::new(3);
        for seq in 1..=5 {
            h.push(finished(seq));
        }
        assert_eq!(seqs(&h), vec![5, 4, 3]);
        assert_eq!(h.latest().map(|r| r.id().seq()), Some(5));
    }

    #[test]
    fn shrinking_evicts_immediately() {
        let mut h = SessionHistory::new(3);
        for seq in 1..=5 {
            h.push(finished(seq));
        }
        h.set_capacity(1);
        assert_eq!(seqs(&h), vec![5]);

        h.set_capacity(4);
        h.push(finished(6));
        assert_eq!(seqs(&h), vec![6, 5]);
    }
}
