//! # CDC controller
//!
//! Keeps one consumption session per configured CDC channel. Each session
//! feeds a [`DedupWindowBuffer`]; the canary probe asks
//! [`CdcController::find_key_timestamp`] when a key showed up on this side.
//!
//! ```text
//! StartupSource(N) ─► Tick(i) ─► CdcConsumeSession(table i)
//!                                    loop until stopping:
//!                                      poll(channel) ─► buffer.ingest(key, record ts)
//!                                      buffer.evict_stale(window)   (window > 0)
//! ```
//!
//! [`CdcController::connect`] subscribes every channel up front; a session
//! picks its subscription up from there or subscribes itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::DedupWindowBuffer;
use crate::clock;
use crate::config::{CdcConfig, CdcTableConfig};
use crate::controller::{
    Controller, ControllerKind, ControllerSettings, ExecutionMode, SessionFactory, StartupSource,
    WorkItem,
};
use crate::error::SessionError;
use crate::events::EventBus;
use crate::messaging::{MessageBus, Subscription};
use crate::session::{Session, SessionContext};

/// Timings of the CDC controller.
#[derive(Clone, Debug)]
pub struct CdcSettings {
    pub poll_timeout: Duration,
    /// Retry slice of [`CdcController::find_key_timestamp`].
    pub lookup_interval: Duration,
    /// Ingestion age after which buffered keys are trimmed (zero = never).
    pub buffer_window: Duration,
}

type Subscriptions = Arc<Mutex<HashMap<String, Box<dyn Subscription>>>>;

/// Owns the CDC consumption sessions and their buffers.
pub struct CdcController {
    controller: Arc<Controller>,
    buffers: Arc<HashMap<String, Arc<DedupWindowBuffer>>>,
    bus: Arc<dyn MessageBus>,
    ready: Subscriptions,
    lookup_interval: Duration,
}

impl CdcController {
    pub fn new(
        config: &CdcConfig,
        bus: Arc<dyn MessageBus>,
        settings: CdcSettings,
        base: ControllerSettings,
        events: EventBus,
    ) -> Self {
        let buffers: HashMap<String, Arc<DedupWindowBuffer>> = config
            .tables
            .iter()
            .map(|t| {
                let buffer = DedupWindowBuffer::new(t.channel.clone(), settings.lookup_interval);
                (t.channel.clone(), Arc::new(buffer))
            })
            .collect();
        let buffers = Arc::new(buffers);

        let tables = config.tables.iter().map(|t| t.table.as_str()).collect::<Vec<_>>().join(",");
        let ready: Subscriptions = Arc::default();
        let factory = CdcConsumeFactory {
            tables: config.tables.clone(),
            buffers: Arc::clone(&buffers),
            bus: Arc::clone(&bus),
            ready: Arc::clone(&ready),
            poll_timeout: settings.poll_timeout,
            buffer_window: settings.buffer_window,
        };
        let source = StartupSource::new(format!("{} CDC channel(s)", config.tables.len()), config.tables.len() as u64);
        let controller = Controller::new(
            "cdc",
            ControllerKind::Cdc,
            Box::new(source),
            Arc::new(factory),
            ControllerSettings {
                mode: ExecutionMode::Concurrent { max: 0 },
                detail: Some(format!("tables={tables}")),
                ..base
            },
            events,
        );

        Self {
            controller,
            buffers,
            bus,
            ready,
            lookup_interval: settings.lookup_interval.max(Duration::from_millis(1)),
        }
    }

    /// Subscribes every CDC channel not subscribed yet. Records published
    /// after this returns reach the buffers once the controller runs.
    ///
    /// A failing channel is logged; its session subscribes on start instead.
    pub async fn connect(&self) {
        for channel in self.buffers.keys() {
            if self.ready.lock().contains_key(channel) {
                continue;
            }
            match self.bus.subscribe(channel).await {
                Ok(sub) => {
                    self.ready.lock().insert(channel.clone(), sub);
                }
                Err(e) => warn!(%channel, error = %e, "CDC channel not subscribed yet"),
            }
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn buffer(&self, channel: &str) -> Option<&Arc<DedupWindowBuffer>> {
        self.buffers.get(channel)
    }

    /// Waits up to `threshold + clock_skew` (never negative) for `key` on `channel`.
    ///
    /// Retries in `lookup_interval` slices; `None` means not found in budget,
    /// or no buffer for `channel`.
    pub async fn find_key_timestamp(
        &self,
        channel: &str,
        key: &str,
        threshold: Duration,
        clock_skew_ms: i64,
    ) -> Option<i64> {
        let Some(buffer) = self.buffers.get(channel) else {
            warn!(channel, "no CDC consumer for channel");
            return None;
        };

        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let budget_ms = threshold_ms.saturating_add(clock_skew_ms).max(0);
        let budget = Duration::from_millis(budget_ms as u64);
        let started = Instant::now();

        loop {
            let waited = started.elapsed();
            debug!(channel, key, ?waited, ?budget, "searching CDC key");
            let remaining = budget.saturating_sub(waited);
            if let Some(ts) = buffer.await_key(key, remaining.min(self.lookup_interval)).await {
                info!(channel, key, at = %clock::format_ms(ts), "CDC key found");
                return Some(ts);
            }
            if started.elapsed() >= budget {
                info!(channel, key, ?budget, "CDC key not found");
                return None;
            }
        }
    }
}

struct CdcConsumeFactory {
    tables: Vec<CdcTableConfig>,
    buffers: Arc<HashMap<String, Arc<DedupWindowBuffer>>>,
    bus: Arc<dyn MessageBus>,
    ready: Subscriptions,
    poll_timeout: Duration,
    buffer_window: Duration,
}

impl SessionFactory for CdcConsumeFactory {
    fn create(&self, item: WorkItem) -> Option<Arc<dyn Session>> {
        let WorkItem::Tick(i) = item else {
            return None;
        };
        let table = self.tables.get(usize::try_from(i).ok()?)?;
        let buffer = self.buffers.get(&table.channel)?;
        Some(Arc::new(CdcConsumeSession {
            table: table.table.clone(),
            channel: table.channel.clone(),
            buffer: Arc::clone(buffer),
            bus: Arc::clone(&self.bus),
            ready: Arc::clone(&self.ready),
            poll_timeout: self.poll_timeout,
            buffer_window: self.buffer_window,
        }))
    }
}

/// Long-lived consumption of one CDC channel; ends when the controller stops.
struct CdcConsumeSession {
    table: String,
    channel: String,
    buffer: Arc<DedupWindowBuffer>,
    bus: Arc<dyn MessageBus>,
    ready: Subscriptions,
    poll_timeout: Duration,
    buffer_window: Duration,
}

#[async_trait]
impl Session for CdcConsumeSession {
    async fn execute(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let ready = self.ready.lock().remove(&self.channel);
        let mut subscription = match ready {
            Some(sub) => sub,
            None => self.bus.subscribe(&self.channel).await?,
        };
        info!(table = %self.table, channel = %self.channel, "buffering CDC records");
        let mut ingested: u64 = 0;

        loop {
            let batch = tokio::select! {
                _ = ctx.stopping().cancelled() => break,
                batch = subscription.poll(self.poll_timeout) => batch?,
            };
            for record in batch {
                if record.key.trim().is_empty() {
                    warn!(channel = %self.channel, "CDC record without key skipped");
                    continue;
                }
                if self.buffer.ingest(&record.key, record.timestamp_ms) {
                    ingested += 1;
                }
            }
            if !self.buffer_window.is_zero() {
                let evicted = self.buffer.evict_stale(self.buffer_window);
                if evicted > 0 {
                    debug!(channel = %self.channel, evicted, "stale CDC keys trimmed");
                }
            }
        }

        ctx.set_message(format!("consumed {ingested} key(s) from {}", self.channel));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryBus;

    fn config() -> CdcConfig {
        CdcConfig {
            tables: vec![CdcTableConfig {
                table: "inv_wi".into(),
                channel: "cdc.inv_wi".into(),
                threshold: Duration::from_secs(4),
            }],
        }
    }

    fn cdc(bus: Arc<MemoryBus>) -> CdcController {
        CdcController::new(
            &config(),
            bus,
            CdcSettings {
                poll_timeout: Duration::from_millis(50),
                lookup_interval: Duration::from_secs(2),
                buffer_window: Duration::ZERO,
            },
            ControllerSettings::default(),
            EventBus::new(64),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_keys_are_found_first_write_wins() {
        let bus = Arc::new(MemoryBus::default());
        let cdc = cdc(bus.clone());
        cdc.connect().await;

        // Published before the consumer session even exists.
        bus.publish_at("cdc.inv_wi", "42", "{}", 1_000);
        bus.publish_at("cdc.inv_wi", "42", "{}", 9_000);
        bus.publish_at("cdc.inv_wi", "", "{}", 2_000);
        let handle = tokio::spawn(Arc::clone(cdc.controller()).run());

        let ts = cdc
            .find_key_timestamp("cdc.inv_wi", "42", Duration::from_secs(4), 0)
            .await;
        assert_eq!(ts, Some(1_000));
        assert_eq!(cdc.buffer("cdc.inv_wi").unwrap().len(), 1);

        cdc.controller().stop_controller();
        handle.await.unwrap().unwrap();
        let stats = cdc.controller().stats();
        assert_eq!((stats.active, stats.done), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_budget_is_threshold_plus_skew() {
        let bus = Arc::new(MemoryBus::default());
        let cdc = cdc(bus);

        let start = Instant::now();
        let ts = cdc
            .find_key_timestamp("cdc.inv_wi", "absent", Duration::from_secs(4), 3_000)
            .await;
        assert_eq!(ts, None);
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_millis(7_100));

        let start = Instant::now();
        let ts = cdc
            .find_key_timestamp("cdc.inv_wi", "absent", Duration::from_secs(4), -10_000)
            .await;
        assert_eq!(ts, None);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let cdc = cdc(Arc::new(MemoryBus::default()));
        let ts = cdc
            .find_key_timestamp("cdc.nowhere", "1", Duration::from_secs(1), 0)
            .await;
        assert_eq!(ts, None);
    }
}
