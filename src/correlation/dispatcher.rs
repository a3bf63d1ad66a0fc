//! # ResponseDispatcher
//!
//! Consumption loop that drains a response channel and completes pending
//! requests by record key. Runs until its token is cancelled.
//!
//! ## Rules
//! - Orphan responses are logged, published as [`EventKind::OrphanResponse`]
//!   and dropped; they never stop the loop.
//! - Subscribe/poll failures are retried with [`BackoffPolicy`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CorrelationRegistry;
use crate::events::{Event, EventBus, EventKind};
use crate::messaging::{MessageBus, Subscription};
use crate::policies::BackoffPolicy;

/// Completes [`CorrelationRegistry`] entries from a response channel.
pub struct ResponseDispatcher {
    name: Arc<str>,
    channel: String,
    registry: Arc<CorrelationRegistry>,
    bus: Arc<dyn MessageBus>,
    events: EventBus,
    poll_timeout: Duration,
    backoff: BackoffPolicy,
}

impl ResponseDispatcher {
    pub fn new(
        name: impl Into<Arc<str>>,
        channel: impl Into<String>,
        registry: Arc<CorrelationRegistry>,
        bus: Arc<dyn MessageBus>,
        events: EventBus,
    ) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            registry,
            bus,
            events,
            poll_timeout: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to the response channel before returning, then spawns the
    /// loop, so responses published after this call are never missed.
    pub async fn spawn(self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let first = self.bus.subscribe(&self.channel).await;
        tokio::spawn(async move { self.run(first.ok(), token).await })
    }

    async fn run(self, mut subscription: Option<Box<dyn Subscription>>, token: CancellationToken) {
        info!(dispatcher = %self.name, channel = %self.channel, "response dispatcher started");
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }

            if subscription.is_none() {
                match self.bus.subscribe(&self.channel).await {
                    Ok(sub) => subscription = Some(sub),
                    Err(e) => {
                        if !self.pause(&token, &mut failures, e.to_string()).await {
                            break;
                        }
                        continue;
                    }
                }
            }
            let Some(sub) = subscription.as_mut() else {
                continue;
            };

            let polled = tokio::select! {
                _ = token.cancelled() => break,
                polled = sub.poll(self.poll_timeout) => polled,
            };

            match polled {
                Ok(batch) => {
                    failures = 0;
                    for record in batch {
                        debug!(dispatcher = %self.name, key = %record.key, "response received");
                        if !self.registry.complete(&record.key, record.value) {
                            self.events.publish(
                                Event::new(EventKind::OrphanResponse)
                                    .with_controller(Arc::clone(&self.name))
                                    .with_session(record.key.as_str()),
                            );
                        }
                    }
                }
                Err(e) => {
                    subscription = None;
                    if !self.pause(&token, &mut failures, e.to_string()).await {
                        break;
                    }
                }
            }
        }
        info!(dispatcher = %self.name, "response dispatcher stopped");
    }

    /// Sleeps per backoff; `false` if cancelled meanwhile.
    async fn pause(&self, token: &CancellationToken, failures: &mut u32, reason: String) -> bool {
        let delay = self.backoff.next(*failures);
        *failures = failures.saturating_add(1);
        warn!(dispatcher = %self.name, %reason, ?delay, "response channel unavailable");
        self.events.publish(
            Event::new(EventKind::SourceFailed)
                .with_controller(Arc::clone(&self.name))
                .with_reason(reason)
                .with_attempt(*failures),
        );
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryBus;

    #[tokio::test]
    async fn completes_pending_requests_and_reports_orphans() {
        let bus = Arc::new(MemoryBus::new(64));
        let registry = Arc::new(CorrelationRegistry::new());
        let events = EventBus::new(16);
        let mut seen = events.subscribe();
        let token = CancellationToken::new();

        let handle = ResponseDispatcher::new(
            "canary-responses",
            "responses",
            Arc::clone(&registry),
            bus.clone(),
            events.clone(),
        )
        .with_poll_timeout(Duration::from_millis(20))
        .spawn(token.clone())
        .await;

        let pending = registry.register("probe-1").unwrap();
        bus.publish("responses", "stray", "late").await.unwrap();
        bus.publish("responses", "probe-1", "pong").await.unwrap();

        let got = pending.wait(Duration::from_secs(2), &token).await;
        assert_eq!(got, Ok("pong".to_string()));

        let orphan = seen.recv().await.unwrap();
        assert_eq!(orphan.kind, EventKind::OrphanResponse);
        assert_eq!(orphan.session.as_deref(), Some("stray"));

        token.cancel();
        handle.await.unwrap();
    }
}
