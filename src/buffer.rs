//! # DedupWindowBuffer
//!
//! Consumer-side cache of `(key, timestamp)` observations with blocking point
//! lookup. Used by the CDC controller to answer "when did key K show up on
//! this side, waiting up to a threshold if it has not yet".
//!
//! ```text
//! consumption loop ──ingest(key, ts)──► records{key → BufferedRecord} ──notify──┐
//!                                              ▲                               │
//! await_key(key, max_wait) ── poll every interval, or earlier when notified ◄──┘
//!        └─ hit ─► evict_older_than(hit.ts) ─► Some(ts)
//! ```
//!
//! ## Rules
//! - **First write wins**: a key already buffered keeps its first timestamp;
//!   later duplicates are dropped, never overwrite.
//! - **Self-trimming**: a successful lookup evicts everything strictly older
//!   than the matched record.
//! - **Bounded wait**: `await_key` returns `None` only once `max_wait` elapsed.
//! - The lock covers map operations only, never a wait.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One buffered observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedRecord {
    /// Business key.
    pub key: String,
    /// Timestamp associated with the key (epoch ms).
    pub timestamp_ms: i64,
    /// When the record entered the buffer.
    pub ingested_at: Instant,
}

/// Deduplicating, self-trimming key → timestamp buffer.
pub struct DedupWindowBuffer {
    name: String,
    records: Mutex<HashMap<String, BufferedRecord>>,
    arrived: Notify,
    poll_interval: Duration,
}

impl DedupWindowBuffer {
    /// Creates an empty buffer; `await_key` re-checks every `poll_interval`.
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffers `key` unless it is already present. Returns `true` if inserted.
    pub fn ingest(&self, key: &str, timestamp_ms: i64) -> bool {
        let mut records = self.records.lock();
        if records.contains_key(key) {
            trace!(buffer = %self.name, key, "duplicate key dropped");
            return false;
        }
        records.insert(
            key.to_string(),
            BufferedRecord {
                key: key.to_string(),
                timestamp_ms,
                ingested_at: Instant::now(),
            },
        );
        drop(records);

        self.arrived.notify_waiters();
        true
    }

    /// Removes all records with `timestamp_ms < cutoff_ms`. Returns how many were removed.
    pub fn evict_older_than(&self, cutoff_ms: i64) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.timestamp_ms >= cutoff_ms);
        before - records.len()
    }

    /// Removes records that were ingested more than `window` ago.
    pub fn evict_stale(&self, window: Duration) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.ingested_at.elapsed() <= window);
        before - records.len()
    }

    /// Non-blocking lookup.
    pub fn get(&self, key: &str) -> Option<BufferedRecord> {
        self.records.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Waits up to `max_wait` for `key` to be buffered.
    ///
    /// On a hit, evicts records older than the match and returns its timestamp.
    /// Returns `None` once `max_wait` elapsed without the key appearing.
    pub async fn await_key(&self, key: &str, max_wait: Duration) -> Option<i64> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let hit = self.records.lock().get(key).map(|r| r.timestamp_ms);
            if let Some(ts) = hit {
                let evicted = self.evict_older_than(ts);
                debug!(buffer = %self.name, key, ts, evicted, "key found");
                return Some(ts);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(buffer = %self.name, key, ?max_wait, "key not found within budget");
                return None;
            }
            let nap = self.poll_interval.min(deadline - now);

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
