//! # Canary probe
//!
//! A synthetic round trip through the TOS, run one at a time on an interval.
//!
//! ```text
//! CanaryRequest{request_id, sequence, request_sent_ms, cdc_tables}
//!      │ HTTP endpoint (transformer + SOAP fault check)
//!      │ or bus: publish(request_channel) ─► CorrelationRegistry wait
//!      ▼
//! CanaryResponse{request_received_ms, response_sent_ms, latest_cdc_creations}
//!      ├─► stamp response_received_ms ─► time sync ─► ProbeState.clock_skew_ms
//!      └─► every `cdc_frequency` probes: resolve each TOS CDC key locally
//!              (CdcController::find_key_timestamp) ─► ProbeState.cdc_ok
//! notify_status ─► {request_id, status OK|NOK, cdc_ok} on status channel
//! ```
//!
//! ## Rules
//! - Transport, fault and decode problems fail the probe.
//! - A CDC mismatch does not fail the probe; it only clears `cdc_ok`.
//! - Missing round-trip stamps keep the previous clock skew.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::cdc::CdcController;
use super::cdc_data::{self, CdcEntry};
use super::time_sync::{RoundTrip, determine_sync_time};
use crate::clock;
use crate::config::CdcConfig;
use crate::controller::{SessionFactory, WorkItem};
use crate::correlation::CorrelationRegistry;
use crate::endpoint::{Endpoint, Transformer, detect_fault};
use crate::error::SessionError;
use crate::messaging::MessageBus;
use crate::session::{Session, SessionContext, SessionRecord, SessionState};

/// Probe request as sent to the TOS.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryRequest {
    pub request_id: String,
    pub sequence: u64,
    pub request_sent_ms: i64,
    /// Comma-separated CDC tables the TOS should report on (empty = none).
    #[serde(default)]
    pub cdc_tables: String,
}

/// TOS answer to a probe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub request_sent_ms: Option<i64>,
    #[serde(default)]
    pub request_received_ms: Option<i64>,
    #[serde(default)]
    pub response_sent_ms: Option<i64>,
    /// `table=key:ts,...` as seen by the TOS.
    #[serde(default)]
    pub latest_cdc_creations: String,
}

/// Best-effort connection status published after each probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub request_id: String,
    /// `OK` or `NOK`.
    pub status: String,
    pub cdc_ok: bool,
}

/// Latest probe results, readable by the dashboard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeSnapshot {
    /// Positive: this side is behind the TOS.
    pub clock_skew_ms: i64,
    pub tos_cdc: String,
    pub local_cdc: String,
    /// `None` until the first CDC comparison.
    pub cdc_ok: Option<bool>,
    pub last_request_id: Option<String>,
}

/// Shared probe results.
#[derive(Debug, Default)]
pub struct ProbeState {
    inner: RwLock<ProbeSnapshot>,
}

impl ProbeState {
    pub fn snapshot(&self) -> ProbeSnapshot {
        self.inner.read().clone()
    }

    pub fn clock_skew_ms(&self) -> i64 {
        self.inner.read().clock_skew_ms
    }

    fn update(&self, f: impl FnOnce(&mut ProbeSnapshot)) {
        f(&mut self.inner.write());
    }
}

/// How a probe reaches the TOS.
pub enum ProbeTransport {
    Http {
        endpoint: Arc<dyn Endpoint>,
        transformer: Option<Arc<dyn Transformer>>,
        scope: String,
    },
    Bus {
        bus: Arc<dyn MessageBus>,
        request_channel: String,
        registry: Arc<CorrelationRegistry>,
        timeout: Duration,
    },
}

impl ProbeTransport {
    pub fn describe(&self) -> String {
        match self {
            ProbeTransport::Http { endpoint, .. } => endpoint.describe(),
            ProbeTransport::Bus { request_channel, .. } => format!("bus:{request_channel}"),
        }
    }

    async fn round_trip(
        &self,
        request_id: &str,
        body: &str,
        ctx: &SessionContext,
    ) -> Result<String, SessionError> {
        match self {
            ProbeTransport::Http {
                endpoint,
                transformer,
                scope,
            } => {
                let wire = match transformer {
                    Some(t) => t.transform_request(body, scope),
                    None => body.to_string(),
                };
                let raw = endpoint.send(&wire).await?;
                if let Some(fault) = detect_fault(&raw) {
                    error!(request_id, %fault, "SOAP fault in probe response");
                    return Err(SessionError::Fault { fault });
                }
                match transformer {
                    Some(t) => t.transform_response(&raw),
                    None => Ok(raw),
                }
            }
            ProbeTransport::Bus {
                bus,
                request_channel,
                registry,
                timeout,
            } => {
                let pending = registry.register(request_id)?;
                bus.publish(request_channel, request_id, body).await?;
                Ok(pending.wait(*timeout, ctx.interrupt()).await?)
            }
        }
    }
}

/// Where status notifications go.
pub struct StatusSink {
    pub bus: Arc<dyn MessageBus>,
    pub channel: String,
}

/// Builds one probe per interval tick.
pub struct CanaryFactory {
    transport: Arc<ProbeTransport>,
    cdc: Option<Arc<CdcController>>,
    cdc_config: Arc<CdcConfig>,
    cdc_frequency: u32,
    cdc_counter: Mutex<u32>,
    sequence: AtomicU64,
    state: Arc<ProbeState>,
    status: Option<Arc<StatusSink>>,
}

impl CanaryFactory {
    pub fn new(
        transport: ProbeTransport,
        cdc: Option<Arc<CdcController>>,
        cdc_config: CdcConfig,
        cdc_frequency: u32,
        state: Arc<ProbeState>,
        status: Option<StatusSink>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            cdc,
            cdc_config: Arc::new(cdc_config),
            cdc_frequency,
            cdc_counter: Mutex::new(0),
            sequence: AtomicU64::new(0),
            state,
            status: status.map(Arc::new),
        }
    }

    pub fn describe_transport(&self) -> String {
        self.transport.describe()
    }

    /// True every `cdc_frequency`-th probe (after the first `cdc_frequency`).
    fn cdc_due(&self) -> bool {
        if self.cdc_frequency == 0 || self.cdc.is_none() || self.cdc_config.tables.is_empty() {
            return false;
        }
        let mut counter = self.cdc_counter.lock();
        let due = *counter >= self.cdc_frequency;
        if due {
            *counter = 0;
        }
        *counter += 1;
        due
    }
}

impl SessionFactory for CanaryFactory {
    fn create(&self, _item: WorkItem) -> Option<Arc<dyn Session>> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let cdc_check = self.cdc_due();
        if cdc_check {
            info!(sequence, "probe includes CDC check");
        }
        Some(Arc::new(CanarySession {
            request_id: format!("{}-{sequence}", clock::now_ms()),
            sequence,
            cdc_check,
            transport: Arc::clone(&self.transport),
            cdc: self.cdc.clone(),
            cdc_config: Arc::clone(&self.cdc_config),
            state: Arc::clone(&self.state),
            status: self.status.clone(),
            cdc_result: Mutex::new(None),
        }))
    }
}

pub struct CanarySession {
    request_id: String,
    sequence: u64,
    cdc_check: bool,
    transport: Arc<ProbeTransport>,
    cdc: Option<Arc<CdcController>>,
    cdc_config: Arc<CdcConfig>,
    state: Arc<ProbeState>,
    status: Option<Arc<StatusSink>>,
    cdc_result: Mutex<Option<bool>>,
}

impl CanarySession {
    fn request(&self) -> CanaryRequest {
        let cdc_tables = if self.cdc_check {
            self.cdc_config.tables.iter().map(|t| t.table.as_str()).collect::<Vec<_>>().join(",")
        } else {
            String::new()
        };
        CanaryRequest {
            request_id: self.request_id.clone(),
            sequence: self.sequence,
            request_sent_ms: clock::now_ms(),
            cdc_tables,
        }
    }

    fn sync_clock(&self, request: &CanaryRequest, response: &CanaryResponse, received_ms: i64) -> i64 {
        let trip = RoundTrip {
            request_sent: Some(response.request_sent_ms.unwrap_or(request.request_sent_ms)),
            request_received: response.request_received_ms,
            response_sent: response.response_sent_ms,
            response_received: Some(received_ms),
        };
        match determine_sync_time(&trip) {
            Ok(skew) => {
                info!(request_id = %self.request_id, skew_ms = skew, "time sync");
                self.state.update(|s| s.clock_skew_ms = skew);
                skew
            }
            Err(e) => {
                error!(request_id = %self.request_id, error = %e, "time sync skipped");
                self.state.clock_skew_ms()
            }
        }
    }

    /// Resolves the TOS CDC entries locally and compares both sides.
    async fn check_cdc(&self, raw: &str, skew_ms: i64) -> bool {
        let Some(cdc) = &self.cdc else {
            return false;
        };
        let now = clock::now_ms();
        let reported = cdc_data::parse_cdc(raw);
        if !cdc_data::covers_tables(&reported, &self.cdc_config) {
            let expected = self.cdc_config.tables.iter().map(|t| t.table.as_str()).collect::<Vec<_>>();
            error!(received = raw, expected = %expected.join(","), "unexpected TOS CDC data");
            return false;
        }
        let tos = cdc_data::remove_too_old(reported, now);

        let mut local = Vec::with_capacity(tos.len());
        for entry in &tos {
            let Some(table) = self.cdc_config.table(&entry.table) else {
                continue;
            };
            let ts = cdc
                .find_key_timestamp(&table.channel, &entry.key, table.threshold, skew_ms)
                .await;
            local.push(CdcEntry::new(entry.table.clone(), entry.key.clone(), ts));
        }

        let ok = cdc_data::determine_cdc_status(&tos, &local, &self.cdc_config, skew_ms, clock::now_ms());
        let (tos_cdc, local_cdc) = (cdc_data::format_cdc(&tos), cdc_data::format_cdc(&local));
        info!(tos = %tos_cdc, local = %local_cdc, cdc_ok = ok, "CDC compared");
        self.state.update(|s| {
            s.tos_cdc = tos_cdc;
            s.local_cdc = local_cdc;
        });
        ok
    }
}

#[async_trait]
impl Session for CanarySession {
    async fn execute(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let request = self.request();
        let body = serde_json::to_string(&request).map_err(SessionError::parse)?;

        let raw = self.transport.round_trip(&self.request_id, &body, ctx).await?;
        let received_ms = clock::now_ms();
        let response: CanaryResponse = serde_json::from_str(&raw).map_err(SessionError::parse)?;
        if !response.request_id.is_empty() && response.request_id != self.request_id {
            warn!(expected = %self.request_id, got = %response.request_id, "probe answered with another request id");
        }

        let skew = self.sync_clock(&request, &response, received_ms);
        self.state.update(|s| s.last_request_id = Some(self.request_id.clone()));

        let mut message = format!("skew={skew}ms");
        if self.cdc_check {
            let ok = self.check_cdc(&response.latest_cdc_creations, skew).await;
            *self.cdc_result.lock() = Some(ok);
            self.state.update(|s| s.cdc_ok = Some(ok));
            message.push_str(if ok { ", cdc=OK" } else { ", cdc=NOK" });
        }
        ctx.set_message(message);
        Ok(())
    }

    async fn notify_status(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let Some(sink) = &self.status else {
            return Ok(());
        };
        let done = record.state() == SessionState::Done;
        let cdc_ok = *self.cdc_result.lock() == Some(true);
        let status = ConnectionStatus {
            request_id: self.request_id.clone(),
            status: if done { "OK" } else { "NOK" }.to_string(),
            cdc_ok: done && cdc_ok,
        };
        let body = serde_json::to_string(&status).map_err(SessionError::parse)?;
        sink.bus.publish(&sink.channel, &self.request_id, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdcTableConfig;
    use crate::controller::ControllerSettings;
    use crate::error::EndpointError;
    use crate::events::EventBus;
    use crate::flows::cdc::CdcSettings;
    use crate::messaging::{MemoryBus, Subscription};
    use crate::session::SessionId;

    /// Answers instantly with a clock 250ms ahead of ours.
    struct FakeTos {
        cdc: String,
    }

    #[async_trait]
    impl Endpoint for FakeTos {
        fn name(&self) -> &str {
            "fake-tos"
        }

        fn describe(&self) -> String {
            "fake-tos".into()
        }

        async fn send(&self, body: &str) -> Result<String, EndpointError> {
            let req: CanaryRequest = serde_json::from_str(body).unwrap();
            let received = req.request_sent_ms + 250;
            let resp = CanaryResponse {
                request_id: req.request_id,
                request_sent_ms: Some(req.request_sent_ms),
                request_received_ms: Some(received),
                response_sent_ms: Some(received),
                latest_cdc_creations: self.cdc.clone(),
            };
            Ok(serde_json::to_string(&resp).unwrap())
        }
    }

    fn cdc_config() -> CdcConfig {
        CdcConfig {
            tables: vec![CdcTableConfig {
                table: "inv_wi".into(),
                channel: "cdc.inv_wi".into(),
                threshold: Duration::from_secs(60),
            }],
        }
    }

    fn http(cdc: &str) -> ProbeTransport {
        ProbeTransport::Http {
            endpoint: Arc::new(FakeTos { cdc: cdc.into() }),
            transformer: None,
            scope: String::new(),
        }
    }

    #[test]
    fn cdc_check_runs_every_nth_probe() {
        let bus = Arc::new(MemoryBus::default());
        let cdc = Arc::new(CdcController::new(
            &cdc_config(),
            bus,
            CdcSettings {
                poll_timeout: Duration::from_millis(50),
                lookup_interval: Duration::from_millis(100),
                buffer_window: Duration::ZERO,
            },
            ControllerSettings::default(),
            EventBus::new(16),
        ));
        let factory = CanaryFactory::new(http(""), Some(cdc), cdc_config(), 2, Arc::default(), None);
        let due: Vec<bool> = (0..7).map(|_| factory.cdc_due()).collect();
        assert_eq!(due, [false, false, true, false, true, false, true]);

        let never = CanaryFactory::new(http(""), None, cdc_config(), 2, Arc::default(), None);
        assert!((0..5).all(|_| !never.cdc_due()));
    }

    #[tokio::test]
    async fn http_probe_updates_clock_skew_and_notifies() {
        let bus = Arc::new(MemoryBus::default());
        let mut status = bus.subscribe("status").await.unwrap();
        let state = Arc::new(ProbeState::default());
        let factory = CanaryFactory::new(
            http(""),
            None,
            CdcConfig::default(),
            0,
            Arc::clone(&state),
            Some(StatusSink {
                bus: bus.clone(),
                channel: "status".into(),
            }),
        );
        let session = factory.create(WorkItem::Tick(1)).unwrap();
        let mut ctx = SessionContext::detached(SessionId::new("canary", 1));
        session.execute(&mut ctx).await.unwrap();

        let skew = state.clock_skew_ms();
        assert!((200..=250).contains(&skew), "skew={skew}");
        assert!(state.snapshot().last_request_id.is_some());

        let record = SessionRecord::active(SessionId::new("canary", 1)).finish(vec![], String::new());
        session.notify_status(&record).await.unwrap();
        let batch = status.poll(Duration::from_millis(100)).await.unwrap();
        let sent: ConnectionStatus = serde_json::from_str(&batch[0].value).unwrap();
        assert_eq!(sent.status, "OK");
        assert!(!sent.cdc_ok);
    }

    #[tokio::test(start_paused = true)]
    async fn bus_probe_round_trips_through_the_registry() {
        let bus = Arc::new(MemoryBus::default());
        let registry = Arc::new(CorrelationRegistry::new());
        let mut requests = bus.subscribe("canary-req").await.unwrap();

        let responder = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let batch = loop {
                    let batch = requests.poll(Duration::from_millis(50)).await.unwrap();
                    if !batch.is_empty() {
                        break batch;
                    }
                };
                let req: CanaryRequest = serde_json::from_str(&batch[0].value).unwrap();
                let resp = CanaryResponse {
                    request_id: req.request_id.clone(),
                    request_sent_ms: Some(req.request_sent_ms),
                    request_received_ms: Some(req.request_sent_ms + 10),
                    response_sent_ms: Some(req.request_sent_ms + 10),
                    latest_cdc_creations: String::new(),
                };
                assert!(registry.complete(&batch[0].key, serde_json::to_string(&resp).unwrap()));
            })
        };

        let factory = CanaryFactory::new(
            ProbeTransport::Bus {
                bus: bus.clone(),
                request_channel: "canary-req".into(),
                registry: Arc::clone(&registry),
                timeout: Duration::from_secs(5),
            },
            None,
            CdcConfig::default(),
            0,
            Arc::default(),
            None,
        );
        let session = factory.create(WorkItem::Tick(1)).unwrap();
        let mut ctx = SessionContext::detached(SessionId::new("canary", 1));
        session.execute(&mut ctx).await.unwrap();
        responder.await.unwrap();
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_bus_probe_times_out() {
        let bus = Arc::new(MemoryBus::default());
        let registry = Arc::new(CorrelationRegistry::new());
        let factory = CanaryFactory::new(
            ProbeTransport::Bus {
                bus,
                request_channel: "canary-req".into(),
                registry: Arc::clone(&registry),
                timeout: Duration::from_millis(500),
            },
            None,
            CdcConfig::default(),
            0,
            Arc::default(),
            None,
        );
        let session = factory.create(WorkItem::Tick(1)).unwrap();
        let mut ctx = SessionContext::detached(SessionId::new("canary", 1));
        let err = session.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.as_label(), "correlation_timeout");
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn uncovered_tos_cdc_clears_cdc_ok_without_failing() {
        let bus = Arc::new(MemoryBus::default());
        let cdc = Arc::new(CdcController::new(
            &cdc_config(),
            bus,
            CdcSettings {
                poll_timeout: Duration::from_millis(50),
                lookup_interval: Duration::from_millis(100),
                buffer_window: Duration::ZERO,
            },
            ControllerSettings::default(),
            EventBus::new(16),
        ));
        let state = Arc::new(ProbeState::default());
        let factory = CanaryFactory::new(http("ref_bizunit=1:5"), Some(cdc), cdc_config(), 1, Arc::clone(&state), None);

        let first = factory.create(WorkItem::Tick(1)).unwrap();
        let mut ctx = SessionContext::detached(SessionId::new("canary", 1));
        first.execute(&mut ctx).await.unwrap();
        assert_eq!(state.snapshot().cdc_ok, None);

        let second = factory.create(WorkItem::Tick(2)).unwrap();
        let mut ctx = SessionContext::detached(SessionId::new("canary", 2));
        second.execute(&mut ctx).await.unwrap();
        assert_eq!(state.snapshot().cdc_ok, Some(false));
    }
}
