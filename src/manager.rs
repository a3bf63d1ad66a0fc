//! # Manager: owns and supervises every controller of the process.
//!
//! ```text
//! MediatorConfig ──init()──► connectors (endpoint + transformer per [[endpoints]])
//!                        ├─► CdcController           ([[cdc.tables]] non-empty)
//!                        ├─► relay Controller × N    ([[flows]], enabled)
//!                        └─► canary Controller       ([canary], state != "off")
//!
//! start() ─► event fan-out (LogWriter + extra subscribers)
//!         ─► response dispatchers (bus-transport canary)
//!         ─► subscribe relay sources and CDC channels
//!         ─► one task per controller not yet running
//!
//! stop()  ─► stop_controller() on all ─► join each within stop_grace
//!              └─ still running ─► interrupt() ─► join within stop_grace
//!                   └─ still running ─► StopTimeout, stays tracked
//! ```
//!
//! ## Rules
//! - `init()` never fails: a broken flow is logged, recorded in the report
//!   and skipped; the rest proceeds.
//! - `start()` is idempotent. Once it returns, every relay flow and CDC
//!   channel is subscribed: records published afterwards are not missed.
//! - A controller is forgotten only once its task is confirmed finished.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{CanaryConfig, FlowConfig, MediatorConfig};
use crate::controller::{
    BusSource, Controller, ControllerKind, ControllerSettings, ControllerState, ExecutionMode,
    IntervalSource,
};
use crate::correlation::{CorrelationRegistry, ResponseDispatcher};
use crate::endpoint::{Endpoint, HttpEndpoint, TemplateTransformer, Transformer};
use crate::error::{ConfigError, ControllerError};
use crate::events::{Event, EventBus, EventKind};
use crate::flows::{
    CanaryFactory, CdcController, CdcSettings, ProbeState, ProbeTransport, RelayFactory, StatusSink,
};
use crate::messaging::MessageBus;
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

const NOT_CONFIGURED: &str = "Manager not initialized yet or not properly configured";

#[derive(Clone)]
struct Connector {
    endpoint: Arc<dyn Endpoint>,
    transformer: Option<Arc<dyn Transformer>>,
}

struct Managed {
    controller: Arc<Controller>,
    handle: Option<JoinHandle<Result<(), ControllerError>>>,
}

impl Managed {
    fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            handle: None,
        }
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Process-level supervisor of all controllers.
pub struct Manager {
    config: MediatorConfig,
    bus: Arc<dyn MessageBus>,
    events: EventBus,
    overrides: HashMap<String, Arc<dyn Endpoint>>,
    extra_subscribers: Vec<Arc<dyn Subscribe>>,

    initialized: bool,
    connectors: BTreeMap<String, Result<Connector, ConfigError>>,
    controllers: Vec<Managed>,
    cdc: Option<Arc<CdcController>>,
    probe_state: Arc<ProbeState>,
    registry: Arc<CorrelationRegistry>,
    config_errors: Vec<ConfigError>,

    pending_dispatchers: Vec<ResponseDispatcher>,
    dispatchers: Vec<JoinHandle<()>>,
    background: CancellationToken,
    fanout: Option<JoinHandle<()>>,
}

impl Manager {
    pub fn new(config: MediatorConfig, bus: Arc<dyn MessageBus>) -> Self {
        let events = EventBus::new(config.runtime.event_bus_capacity);
        Self {
            config,
            bus,
            events,
            overrides: HashMap::new(),
            extra_subscribers: Vec::new(),
            initialized: false,
            connectors: BTreeMap::new(),
            controllers: Vec::new(),
            cdc: None,
            probe_state: Arc::new(ProbeState::default()),
            registry: Arc::new(CorrelationRegistry::new()),
            config_errors: Vec::new(),
            pending_dispatchers: Vec::new(),
            dispatchers: Vec::new(),
            background: CancellationToken::new(),
            fanout: None,
        }
    }

    /// Uses `endpoint` for connector `name` instead of building an HTTP client.
    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.overrides.insert(name.into(), endpoint);
        self
    }

    /// Adds an event subscriber next to the built-in [`LogWriter`].
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.extra_subscribers.push(subscriber);
        self
    }

    /// Builds connectors and controllers from the configuration. Runs once.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        self.build_connectors();
        self.build_cdc();

        let flows = self.config.flows.clone();
        for flow in &flows {
            if !flow.enabled {
                info!(flow = %flow.name, "flow disabled");
                continue;
            }
            match self.build_flow(flow) {
                Ok(controller) => self.controllers.push(Managed::new(controller)),
                Err(e) => self.record_error(e),
            }
        }

        match self.config.canary.clone() {
            Some(canary) if canary.is_enabled() => match self.build_canary(&canary) {
                Ok(controller) => self.controllers.push(Managed::new(controller)),
                Err(e) => self.record_error(e),
            },
            Some(_) => info!("canary disabled"),
            None => {}
        }

        info!(
            controllers = self.controllers.len(),
            errors = self.config_errors.len(),
            "manager initialized"
        );
    }

    fn record_error(&mut self, e: ConfigError) {
        error!(label = e.as_label(), error = %e, "controller not created");
        self.config_errors.push(e);
    }

    fn build_connectors(&mut self) {
        for cfg in &self.config.endpoints {
            let built = self.build_connector(cfg);
            if let Err(e) = &built {
                error!(endpoint = %cfg.name, error = %e, "connector not usable");
            }
            self.connectors.insert(cfg.name.clone(), built);
        }
        for (name, endpoint) in &self.overrides {
            if !self.connectors.contains_key(name) {
                let connector = Connector {
                    endpoint: Arc::clone(endpoint),
                    transformer: None,
                };
                self.connectors.insert(name.clone(), Ok(connector));
            }
        }
    }

    fn build_connector(&self, cfg: &crate::config::EndpointConfig) -> Result<Connector, ConfigError> {
        let transformer = match &cfg.transformer {
            Some(t) => Some(Arc::new(TemplateTransformer::from_config(&cfg.name, t)?) as Arc<dyn Transformer>),
            None => None,
        };
        let endpoint = match self.overrides.get(&cfg.name) {
            Some(ep) => Arc::clone(ep),
            None => Arc::new(HttpEndpoint::from_config(cfg)?) as Arc<dyn Endpoint>,
        };
        Ok(Connector {
            endpoint,
            transformer,
        })
    }

    fn connector(&self, owner: &str, name: &str) -> Result<Connector, ConfigError> {
        match self.connectors.get(name) {
            Some(Ok(c)) => Ok(c.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ConfigError::UnknownEndpoint {
                owner: owner.to_string(),
                endpoint: name.to_string(),
            }),
        }
    }

    fn base_settings(&self) -> ControllerSettings {
        let rt = &self.config.runtime;
        ControllerSettings {
            drain_grace: rt.drain_grace,
            backoff: rt.source_backoff,
            report_width: rt.report_width,
            ..ControllerSettings::default()
        }
    }

    fn build_cdc(&mut self) {
        if self.config.cdc.tables.is_empty() {
            return;
        }
        let rt = &self.config.runtime;
        let cdc = CdcController::new(
            &self.config.cdc,
            Arc::clone(&self.bus),
            CdcSettings {
                poll_timeout: rt.poll_timeout,
                lookup_interval: rt.lookup_interval,
                buffer_window: rt.buffer_window,
            },
            self.base_settings(),
            self.events.clone(),
        );
        let cdc = Arc::new(cdc);
        self.controllers.push(Managed::new(Arc::clone(cdc.controller())));
        self.cdc = Some(cdc);
    }

    fn build_flow(&self, flow: &FlowConfig) -> Result<Arc<Controller>, ConfigError> {
        self.config.validate_flow(flow)?;
        let connector = self.connector(&flow.name, &flow.endpoint)?;

        let source = BusSource::new(
            Arc::clone(&self.bus),
            flow.source_channel.clone(),
            self.config.runtime.poll_timeout,
        );
        let settings = ControllerSettings {
            mode: ExecutionMode::Concurrent {
                max: flow.max_concurrent,
            },
            history_capacity: Some(flow.history_capacity).filter(|c| *c > 0),
            endpoint: Some(connector.endpoint.describe()),
            detail: Some(format!("responds to {}", flow.response_channel)),
            ..self.base_settings()
        };
        let factory = RelayFactory::new(
            flow.name.clone(),
            self.config.scope.clone(),
            flow.response_channel.clone(),
            connector.endpoint,
            connector.transformer,
            Arc::clone(&self.bus),
        );
        info!(flow = %flow.name, source = %flow.source_channel, "relay flow configured");
        Ok(Controller::new(
            flow.name.clone(),
            ControllerKind::Relay,
            Box::new(source),
            Arc::new(factory),
            settings,
            self.events.clone(),
        ))
    }

    fn build_canary(&mut self, cfg: &CanaryConfig) -> Result<Arc<Controller>, ConfigError> {
        const OWNER: &str = "canary";

        let transport = match (&cfg.endpoint, &cfg.request_channel, &cfg.response_channel) {
            (Some(name), _, _) => {
                let connector = self.connector(OWNER, name)?;
                ProbeTransport::Http {
                    endpoint: connector.endpoint,
                    transformer: connector.transformer,
                    scope: self.config.scope.clone(),
                }
            }
            (None, Some(request), Some(response)) => {
                let dispatcher = ResponseDispatcher::new(
                    "canary-responses",
                    response.clone(),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.bus),
                    self.events.clone(),
                )
                .with_poll_timeout(self.config.runtime.poll_timeout)
                .with_backoff(self.config.runtime.source_backoff);
                self.pending_dispatchers.push(dispatcher);
                ProbeTransport::Bus {
                    bus: Arc::clone(&self.bus),
                    request_channel: request.clone(),
                    registry: Arc::clone(&self.registry),
                    timeout: cfg.timeout,
                }
            }
            _ => {
                return Err(ConfigError::MissingTransport {
                    owner: OWNER.to_string(),
                });
            }
        };

        let status = cfg.status_channel.as_ref().map(|channel| StatusSink {
            bus: Arc::clone(&self.bus),
            channel: channel.clone(),
        });
        let factory = CanaryFactory::new(
            transport,
            self.cdc.clone(),
            self.config.cdc.clone(),
            cfg.cdc_frequency,
            Arc::clone(&self.probe_state),
            status,
        );
        let settings = ControllerSettings {
            mode: ExecutionMode::Sequential,
            history_capacity: Some(cfg.history_capacity),
            endpoint: Some(factory.describe_transport()),
            detail: Some(format!(
                "interval/cdc freq={}/{}",
                cfg.interval.as_secs(),
                cfg.cdc_frequency
            )),
            ..self.base_settings()
        };
        Ok(Controller::new(
            OWNER,
            ControllerKind::Canary,
            Box::new(IntervalSource::new(cfg.interval)),
            Arc::new(factory),
            settings,
            self.events.clone(),
        ))
    }

    /// Starts every controller that is not running yet.
    ///
    /// Initializes first if needed. Controllers that already ran are skipped.
    pub async fn start(&mut self) {
        self.init();
        if self.background.is_cancelled() {
            self.background = CancellationToken::new();
        }

        if self.fanout.as_ref().is_none_or(|h| h.is_finished()) {
            self.fanout = Some(self.spawn_fanout());
        }
        for dispatcher in std::mem::take(&mut self.pending_dispatchers) {
            let handle = dispatcher.spawn(self.background.child_token()).await;
            self.dispatchers.push(handle);
        }

        if let Some(cdc) = self.cdc.as_ref().filter(|c| c.controller().state() == ControllerState::Idle) {
            cdc.connect().await;
        }
        for managed in &mut self.controllers {
            if managed.is_alive() {
                continue;
            }
            if managed.controller.state() != ControllerState::Idle {
                warn!(controller = %managed.controller.name(), state = %managed.controller.state(), "controller cannot be restarted");
                continue;
            }
            if let Err(e) = managed.controller.prepare_source().await {
                warn!(controller = %managed.controller.name(), error = %e, "subscription deferred to first poll");
            }
            managed.handle = Some(tokio::spawn(Arc::clone(&managed.controller).run()));
        }
    }

    fn spawn_fanout(&self) -> JoinHandle<()> {
        let mut subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
        subs.extend(self.extra_subscribers.iter().cloned());
        let set = SubscriberSet::new(subs);
        let mut rx = self.events.subscribe();
        let token = self.background.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "event fan-out lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            while let Ok(ev) = rx.try_recv() {
                set.emit(&ev);
            }
            set.shutdown().await;
        })
    }

    /// Stops every controller, escalating to an interrupt after `stop_grace`.
    pub async fn stop(&mut self) {
        let grace = self.config.runtime.stop_grace;
        for managed in &self.controllers {
            managed.controller.stop_controller();
        }

        let mut refused = Vec::new();
        for mut managed in std::mem::take(&mut self.controllers) {
            let Some(mut handle) = managed.handle.take() else {
                continue;
            };
            let name = managed.controller.name().to_string();
            if join_within(&name, &mut handle, grace).await {
                continue;
            }
            warn!(controller = %name, ?grace, "controller still running, interrupting");
            managed.controller.interrupt();
            if join_within(&name, &mut handle, grace).await {
                continue;
            }
            error!(controller = %name, "controller refused to stop; still tracked");
            self.events.publish(
                Event::new(EventKind::StopTimeout)
                    .with_controller(name)
                    .with_delay(grace),
            );
            managed.handle = Some(handle);
            refused.push(managed);
        }
        self.controllers = refused;

        self.background.cancel();
        for mut handle in self.dispatchers.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        if let Some(mut fanout) = self.fanout.take() {
            if tokio::time::timeout(grace, &mut fanout).await.is_err() {
                fanout.abort();
            }
        }
        info!(remaining = self.controllers.len(), "manager stopped");
    }

    /// Aggregate operator report.
    pub fn report(&self) -> String {
        if self.controllers.is_empty() {
            let mut out = NOT_CONFIGURED.to_string();
            append_errors(&mut out, &self.config_errors);
            return out;
        }

        let mut out = String::from("Connectors:");
        for (name, connector) in &self.connectors {
            match connector {
                Ok(c) => out.push_str(&format!("\n\t{name}: {}", c.endpoint.describe())),
                Err(e) => out.push_str(&format!("\n\t{name}: {e}")),
            }
        }
        for (title, kind) in [
            ("FlowControllers", ControllerKind::Relay),
            ("CanaryControllers", ControllerKind::Canary),
            ("CDCControllers", ControllerKind::Cdc),
        ] {
            out.push_str(&format!("\n\n{title}:"));
            for managed in self.controllers.iter().filter(|m| m.controller.kind() == kind) {
                out.push('\n');
                out.push_str(&managed.controller.report());
            }
        }
        append_errors(&mut out, &self.config_errors);
        out
    }

    pub fn flow_controllers(&self) -> Vec<Arc<Controller>> {
        self.of_kind(ControllerKind::Relay).collect()
    }

    pub fn canary_controller(&self) -> Option<Arc<Controller>> {
        self.of_kind(ControllerKind::Canary).next()
    }

    pub fn cdc_controller(&self) -> Option<&Arc<CdcController>> {
        self.cdc.as_ref()
    }

    fn of_kind(&self, kind: ControllerKind) -> impl Iterator<Item = Arc<Controller>> + '_ {
        self.controllers
            .iter()
            .filter(move |m| m.controller.kind() == kind)
            .map(|m| Arc::clone(&m.controller))
    }

    /// Latest canary results (clock skew, CDC status).
    pub fn probe_state(&self) -> Arc<ProbeState> {
        Arc::clone(&self.probe_state)
    }

    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

fn append_errors(out: &mut String, errors: &[ConfigError]) {
    if errors.is_empty() {
        return;
    }
    out.push_str("\n\nConfiguration errors:");
    for e in errors {
        out.push_str(&format!("\n\t{e}"));
    }
}

/// `true` once the controller task finished (cleanly or not) within `grace`.
async fn join_within(
    name: &str,
    handle: &mut JoinHandle<Result<(), ControllerError>>,
    grace: Duration,
) -> bool {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            warn!(controller = name, error = %e, "controller ended with error");
            true
        }
        Ok(Err(e)) => {
            error!(controller = name, error = %e, "controller task failed");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::EndpointError;
    use crate::flows::{CanaryRequest, CanaryResponse, ConnectionStatus};
    use crate::messaging::{MemoryBus, Subscription};

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn describe(&self) -> String {
            "echo".into()
        }

        async fn send(&self, body: &str) -> Result<String, EndpointError> {
            Ok(format!("ack:{body}"))
        }
    }

    struct Hang;

    #[async_trait]
    impl Endpoint for Hang {
        fn name(&self) -> &str {
            "hang"
        }

        fn describe(&self) -> String {
            "hang".into()
        }

        async fn send(&self, _body: &str) -> Result<String, EndpointError> {
            std::future::pending().await
        }
    }

    const CONFIG: &str = r#"
        [runtime]
        poll_timeout_ms = 20
        drain_grace_ms = 100

        [[endpoints]]
        name = "tos"
        url = "http://127.0.0.1:9/ws"

        [[flows]]
        name = "gate"
        source_channel = "gate-in"
        response_channel = "gate-out"
        endpoint = "tos"

        [[flows]]
        name = "vessel"
        source_channel = "vessel-in"
        response_channel = "vessel-out"
        endpoint = "missing"

        [[flows]]
        name = "rail"
        source_channel = "rail-in"
        response_channel = "rail-out"
        endpoint = "tos"
        enabled = false
    "#;

    fn manager(endpoint: Arc<dyn Endpoint>) -> (Manager, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::default());
        let config = MediatorConfig::from_toml_str(CONFIG).unwrap();
        let manager = Manager::new(config, bus.clone()).with_endpoint("tos", endpoint);
        (manager, bus)
    }

    #[test]
    fn broken_flow_is_reported_and_others_proceed() {
        let (mut mgr, _bus) = manager(Arc::new(Echo));
        mgr.init();
        mgr.init();

        let flows = mgr.flow_controllers();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].name(), "gate");
        assert_eq!(mgr.config_errors().len(), 1);
        assert!(mgr.canary_controller().is_none());

        let report = mgr.to_string();
        assert!(report.starts_with("Connectors:\n\ttos: echo"), "{report}");
        assert!(report.contains("FlowController gate subscribed to gate-in, state=IDLE"));
        assert!(report.contains("vessel: No Endpoint connector found (bad reference 'missing')"));
    }

    #[test]
    fn empty_manager_says_so() {
        let mgr = Manager::new(MediatorConfig::default(), Arc::new(MemoryBus::default()));
        assert_eq!(mgr.report(), NOT_CONFIGURED);
    }

    #[tokio::test]
    async fn relays_end_to_end_and_stops_cleanly() {
        let (mut mgr, bus) = manager(Arc::new(Echo));
        let mut out = bus.subscribe("gate-out").await.unwrap();
        mgr.start().await;
        mgr.start().await;

        // Subscribed by the time start() returns.
        bus.publish("gate-in", "unit-1", "<move/>").await.unwrap();
        let gate = mgr.flow_controllers().remove(0);

        let mut got = Vec::new();
        while got.is_empty() {
            got = out.poll(Duration::from_millis(100)).await.unwrap();
        }
        assert_eq!(got[0].key, "unit-1");
        assert_eq!(got[0].value, "ack:<move/>");

        mgr.stop().await;
        assert_eq!(gate.state(), ControllerState::Stopped);
        assert_eq!(gate.stats().done, 1);
        assert_eq!(gate.last_sessions().len(), 1);
        assert!(mgr.flow_controllers().is_empty());
        assert_eq!(mgr.report(), format!("{NOT_CONFIGURED}\n\nConfiguration errors:\n\tvessel: No Endpoint connector found (bad reference 'missing')"));
    }

    #[tokio::test]
    async fn blocked_sessions_are_interrupted_on_stop() {
        let (mut mgr, bus) = manager(Arc::new(Hang));
        mgr.start().await;
        bus.publish("gate-in", "unit-1", "<move/>").await.unwrap();

        let gate = mgr.flow_controllers().remove(0);
        while gate.stats().active == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        mgr.stop().await;
        let stats = gate.stats();
        assert_eq!((stats.active, stats.failed), (0, 1));
        assert!(gate.report().contains("error=session interrupted"));
    }

    #[tokio::test]
    async fn bus_canary_round_trips_through_the_dispatcher() {
        let bus = Arc::new(MemoryBus::default());
        let config = MediatorConfig::from_toml_str(
            r#"
            [runtime]
            poll_timeout_ms = 20

            [canary]
            interval_ms = 60000
            cdc_frequency = 0
            request_channel = "probe-req"
            response_channel = "probe-resp"
            status_channel = "probe-status"
        "#,
        )
        .unwrap();
        let mut requests = bus.subscribe("probe-req").await.unwrap();
        let mut statuses = bus.subscribe("probe-status").await.unwrap();
        let mut mgr = Manager::new(config, bus.clone());
        mgr.start().await;
        assert!(mgr.report().contains("CanaryController canary subscribed to interval 60000ms"));

        let batch = poll_until_some(&mut requests).await;
        let req: CanaryRequest = serde_json::from_str(&batch[0].value).unwrap();
        let resp = CanaryResponse {
            request_id: req.request_id.clone(),
            request_sent_ms: Some(req.request_sent_ms),
            request_received_ms: Some(req.request_sent_ms),
            response_sent_ms: Some(req.request_sent_ms),
            latest_cdc_creations: String::new(),
        };
        let body = serde_json::to_string(&resp).unwrap();
        bus.publish("probe-resp", &batch[0].key, &body).await.unwrap();

        let batch = poll_until_some(&mut statuses).await;
        let status: ConnectionStatus = serde_json::from_str(&batch[0].value).unwrap();
        assert_eq!(status.request_id, req.request_id);
        assert_eq!(status.status, "OK");
        assert!(!status.cdc_ok);
        assert_eq!(mgr.probe_state().snapshot().last_request_id, Some(req.request_id));

        let canary = mgr.canary_controller().unwrap();
        mgr.stop().await;
        assert_eq!(canary.state(), ControllerState::Stopped);
        assert_eq!(canary.stats().done, 1);
    }

    async fn poll_until_some(sub: &mut Box<dyn Subscription>) -> Vec<crate::messaging::BusRecord> {
        loop {
            let batch = sub.poll(Duration::from_millis(100)).await.unwrap();
            if !batch.is_empty() {
                return batch;
            }
        }
    }
}
