//! # CorrelationRegistry
//!
//! Pending requests live in a mutex-guarded map of key → oneshot sender.
//! `complete` removes the entry and sends while still holding the lock, so
//! once a waiter finds its entry gone the value is already in its channel.
//! That makes the timer/completion race resolve exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CorrelationError;

struct Pending {
    ticket: u64,
    tx: oneshot::Sender<String>,
}

/// Maps correlation keys to waiting callers.
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, Pending>>,
    tickets: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        }
    }

    /// Registers a pending request for `key`.
    ///
    /// Register before publishing the request, so a fast response cannot
    /// arrive ahead of its slot.
    pub fn register(self: &Arc<Self>, key: &str) -> Result<PendingResponse, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock();
        if pending.contains_key(key) {
            return Err(CorrelationError::DuplicateKey {
                key: key.to_string(),
            });
        }
        pending.insert(key.to_string(), Pending { ticket, tx });
        drop(pending);

        Ok(PendingResponse {
            key: key.to_string(),
            ticket,
            registry: Arc::clone(self),
            rx,
            settled: false,
        })
    }

    /// Registers `key` and waits up to `timeout` for its response.
    pub async fn register_and_await(
        self: &Arc<Self>,
        key: &str,
        timeout: Duration,
        interrupt: &CancellationToken,
    ) -> Result<String, CorrelationError> {
        self.register(key)?.wait(timeout, interrupt).await
    }

    /// Delivers `value` to the caller waiting on `key`.
    ///
    /// Returns `false` for an orphan response (nobody waiting, e.g. the
    /// caller already timed out); orphans are logged and discarded.
    pub fn complete(&self, key: &str, value: String) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.remove(key) else {
            drop(pending);
            warn!(key, "no handler found for key, response discarded");
            return false;
        };
        if entry.tx.send(value).is_err() {
            debug!(key, "waiter went away before delivery");
            return false;
        }
        true
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Removes `key` if it still belongs to `ticket`; `true` if this call removed it.
    fn withdraw(&self, key: &str, ticket: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(key) {
            Some(entry) if entry.ticket == ticket => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-side handle of one pending request.
///
/// Dropping the handle without waiting withdraws the request.
pub struct PendingResponse {
    key: String,
    ticket: u64,
    registry: Arc<CorrelationRegistry>,
    rx: oneshot::Receiver<String>,
    settled: bool,
}

impl PendingResponse {
    /// Waits up to `timeout` for the response, or until `interrupt` fires.
    ///
    /// On timeout or interrupt the entry is withdrawn; if `complete` got there
    /// first, its value is returned instead.
    pub async fn wait(
        mut self,
        timeout: Duration,
        interrupt: &CancellationToken,
    ) -> Result<String, CorrelationError> {
        let outcome = tokio::select! {
            res = &mut self.rx => Some(res),
            _ = tokio::time::sleep(timeout) => None,
            _ = interrupt.cancelled() => None,
        };

        if let Some(Ok(value)) = outcome {
            self.settled = true;
            return Ok(value);
        }

        if !self.registry.withdraw(&self.key, self.ticket) {
            // `complete` won the race; its send happened under the lock we just took.
            if let Ok(value) = self.rx.try_recv() {
                self.settled = true;
                return Ok(value);
            }
        }
        self.settled = true;

        if interrupt.is_cancelled() {
            Err(CorrelationError::Canceled {
                key: self.key.clone(),
            })
        } else {
            Err(CorrelationError::Timeout {
                key: self.key.clone(),
                timeout,
            })
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.withdraw(&self.key, self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<CorrelationRegistry> {
        Arc::new(CorrelationRegistry::new())
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_while_pending() {
        let reg = registry();
        let _first = reg.register("req-1").unwrap();
        let err = reg.register("req-1").err();
        assert_eq!(
            err,
            Some(CorrelationError::DuplicateKey {
                key: "req-1".into()
            })
        );
    }

    #[tokio::test]
    async fn complete_on_unknown_key_is_a_no_op() {
        let reg = registry();
        assert!(!reg.complete("nobody", "value".into()));
        assert_eq!(reg.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn response_before_deadline_is_delivered() {
        let reg = registry();
        let token = CancellationToken::new();

        let responder = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                reg.complete("req-200", "pong".into())
            })
        };

        let got = reg
            .register_and_await("req-200", Duration::from_millis(500), &token)
            .await;
        assert_eq!(got, Ok("pong".to_string()));
        assert!(responder.await.unwrap());
        assert_eq!(reg.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_timeout_is_discarded() {
        let reg = registry();
        let token = CancellationToken::new();

        let responder = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(600)).await;
                reg.complete("req-600", "pong".into())
            })
        };

        let got = reg
            .register_and_await("req-600", Duration::from_millis(500), &token)
            .await;
        assert!(matches!(got, Err(CorrelationError::Timeout { .. })));
        assert!(!responder.await.unwrap());
        assert_eq!(reg.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_surfaces_as_canceled() {
        let reg = registry();
        let token = CancellationToken::new();
        let pending = reg.register("req-int").unwrap();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let got = pending.wait(Duration::from_secs(30), &token).await;
        assert!(matches!(got, Err(CorrelationError::Canceled { .. })));
        assert_eq!(reg.pending(), 0);
    }

    #[tokio::test]
    async fn dropped_handle_withdraws_and_key_can_be_reused() {
        let reg = registry();
        drop(reg.register("req-drop").unwrap());
        assert_eq!(reg.pending(), 0);

        let again = reg.register("req-drop").unwrap();
        assert!(reg.complete("req-drop", "ok".into()));
        let token = CancellationToken::new();
        assert_eq!(again.wait(Duration::from_millis(10), &token).await, Ok("ok".into()));
    }

    #[tokio::test]
    async fn completion_that_wins_the_race_is_not_lost() {
        let reg = registry();
        let token = CancellationToken::new();
        let pending = reg.register("req-race").unwrap();

        assert!(reg.complete("req-race", "first".into()));
        let got = pending.wait(Duration::ZERO, &token).await;
        assert_eq!(got, Ok("first".to_string()));
    }
}
