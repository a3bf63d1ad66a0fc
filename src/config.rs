//! # Mediator configuration.
//!
//! [`MediatorConfig`] is read once at startup from a TOML file. Every section
//! is optional and falls back to the defaults documented on its `Default`
//! impl; durations are written in milliseconds (`*_ms` keys).
//!
//! # Example
//! ```
//! use tos_mediator::MediatorConfig;
//!
//! let cfg = MediatorConfig::from_toml_str(r#"
//!     scope = "ORG/FCY/YRD"
//!
//!     [[endpoints]]
//!     name = "tos"
//!     url = "http://tos.local/apex/services/argobasicservice"
//!
//!     [[flows]]
//!     name = "gate"
//!     source_channel = "gate-events"
//!     response_channel = "gate-results"
//!     endpoint = "tos"
//! "#).unwrap();
//!
//! assert_eq!(cfg.flows.len(), 1);
//! assert!(cfg.canary.is_none());
//! ```
//!
//! ## Rules
//! - Sentinel `0` means unlimited (`max_concurrent`) or disabled
//!   (`buffer_window_ms`, `cdc_frequency`).
//! - Validation is per flow: [`MediatorConfig::validate_flow`] reports a
//!   [`ConfigError`] for that flow only.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, MediatorError};
use crate::policies::{BackoffPolicy, millis};

/// Whole-process configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// TOS scope coordinates handed to request transformers.
    pub scope: String,
    pub runtime: RuntimeConfig,
    pub endpoints: Vec<EndpointConfig>,
    pub flows: Vec<FlowConfig>,
    /// Canary probe; absent means no canary controller.
    pub canary: Option<CanaryConfig>,
    pub cdc: CdcConfig,
}

/// Supervision timings shared by every controller.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bounded join per controller on stop, before (and after) the interrupt.
    #[serde(with = "millis", rename = "stop_grace_ms")]
    pub stop_grace: Duration,
    /// How long a stopping controller lets in-flight sessions finish.
    #[serde(with = "millis", rename = "drain_grace_ms")]
    pub drain_grace: Duration,
    /// Upper bound of one bus poll.
    #[serde(with = "millis", rename = "poll_timeout_ms")]
    pub poll_timeout: Duration,
    /// Retry slice of CDC key lookups.
    #[serde(with = "millis", rename = "lookup_interval_ms")]
    pub lookup_interval: Duration,
    /// Age (by ingestion) after which CDC buffer entries are trimmed (0 = never).
    #[serde(with = "millis", rename = "buffer_window_ms")]
    pub buffer_window: Duration,
    pub event_bus_capacity: usize,
    /// Report line width (0 = no wrapping).
    pub report_width: usize,
    pub source_backoff: BackoffPolicy,
}

impl Default for RuntimeConfig {
    /// - `stop_grace = 1s`, `drain_grace = 1s`
    /// - `poll_timeout = 500ms`, `lookup_interval = 2s`
    /// - `buffer_window = 0` (disabled)
    /// - `event_bus_capacity = 1024`, `report_width = 160`
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(1),
            drain_grace: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(500),
            lookup_interval: Duration::from_secs(2),
            buffer_window: Duration::ZERO,
            event_bus_capacity: 1024,
            report_width: 160,
            source_backoff: BackoffPolicy::default(),
        }
    }
}

/// One HTTP/SOAP connector.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(with = "millis", rename = "timeout_ms")]
    pub timeout: Duration,
    pub soap_action: Option<String>,
    pub content_type: String,
    pub transformer: Option<TransformerConfig>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            timeout: Duration::from_secs(30),
            soap_action: None,
            content_type: "text/xml; charset=utf-8".to_string(),
            transformer: None,
        }
    }
}

/// Request/response templating of an endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Wire body with `{body}` and optional `{scope}` placeholders.
    pub request_template: String,
    /// Payload is cut from the response between these markers.
    pub response_start: Option<String>,
    pub response_end: Option<String>,
    /// XML-unescape the extracted payload.
    pub unescape_xml: bool,
}

/// One event-relay flow.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub name: String,
    pub source_channel: String,
    pub response_channel: String,
    /// Name of an entry in `endpoints`.
    pub endpoint: String,
    /// In-flight session limit (0 = unlimited).
    pub max_concurrent: usize,
    /// Finished sessions kept for the dashboard (0 = none).
    pub history_capacity: usize,
    pub enabled: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            source_channel: String::new(),
            response_channel: String::new(),
            endpoint: String::new(),
            max_concurrent: 0,
            history_capacity: 30,
            enabled: true,
        }
    }
}

/// Periodic canary probe.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// `"off"` (any case) disables the probe.
    pub state: String,
    #[serde(with = "millis", rename = "interval_ms")]
    pub interval: Duration,
    /// Compare CDC every N probes (0 = never).
    pub cdc_frequency: u32,
    pub history_capacity: usize,
    /// Round-trip budget of one probe.
    #[serde(with = "millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// HTTP transport: name of an entry in `endpoints`.
    pub endpoint: Option<String>,
    /// Bus transport: request and response channels.
    pub request_channel: Option<String>,
    pub response_channel: Option<String>,
    /// Best-effort status notifications go here when set.
    pub status_channel: Option<String>,
}

impl Default for CanaryConfig {
    /// `interval = 5s`, `cdc_frequency = 5`, `history_capacity = 30`, `timeout = 10s`.
    fn default() -> Self {
        Self {
            state: "on".to_string(),
            interval: Duration::from_secs(5),
            cdc_frequency: 5,
            history_capacity: 30,
            timeout: Duration::from_secs(10),
            endpoint: None,
            request_channel: None,
            response_channel: None,
            status_channel: None,
        }
    }
}

impl CanaryConfig {
    pub fn is_enabled(&self) -> bool {
        !self.state.trim().eq_ignore_ascii_case("off")
    }
}

/// CDC consumption.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CdcConfig {
    pub tables: Vec<CdcTableConfig>,
}

impl CdcConfig {
    pub fn table(&self, table: &str) -> Option<&CdcTableConfig> {
        self.tables.iter().find(|t| t.table == table)
    }
}

/// One CDC table and the channel carrying its local changes.
#[derive(Clone, Debug, Deserialize)]
pub struct CdcTableConfig {
    pub table: String,
    pub channel: String,
    /// Maximum tolerated lag between both sides.
    #[serde(with = "millis", rename = "threshold_ms")]
    pub threshold: Duration,
}

impl MediatorConfig {
    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MediatorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MediatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| MediatorError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Nothing to supervise: no flows, no canary and no CDC tables.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty() && self.canary.is_none() && self.cdc.tables.is_empty()
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Checks one flow's references; the first problem wins.
    pub fn validate_flow(&self, flow: &FlowConfig) -> Result<&EndpointConfig, ConfigError> {
        if flow.source_channel.trim().is_empty() {
            return Err(ConfigError::MissingChannel {
                owner: flow.name.clone(),
                what: "source",
            });
        }
        if flow.response_channel.trim().is_empty() {
            return Err(ConfigError::MissingChannel {
                owner: flow.name.clone(),
                what: "response",
            });
        }
        if self.flows.iter().filter(|f| f.name == flow.name).count() > 1 {
            return Err(ConfigError::DuplicateFlow {
                flow: flow.name.clone(),
            });
        }
        self.endpoint(&flow.endpoint)
            .ok_or_else(|| ConfigError::UnknownEndpoint {
                owner: flow.name.clone(),
                endpoint: flow.endpoint.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        scope = "ORG/FCY/YRD"

        [runtime]
        stop_grace_ms = 250
        report_width = 0

        [runtime.source_backoff]
        first_ms = 100
        max_ms = 1000
        jitter = "none"

        [[endpoints]]
        name = "tos"
        url = "http://tos.local/ws"
        soap_action = "basicInvoke"

        [endpoints.transformer]
        request_template = "<env>{body}</env>"

        [[flows]]
        name = "gate"
        source_channel = "gate-in"
        response_channel = "gate-out"
        endpoint = "tos"

        [[flows]]
        name = "broken"
        source_channel = "x-in"
        response_channel = "x-out"
        endpoint = "nowhere"

        [canary]
        state = "OFF"
        cdc_frequency = 3

        [[cdc.tables]]
        table = "inv_wi"
        channel = "cdc.inv_wi"
        threshold_ms = 4000
    "#;

    #[test]
    fn sections_parse_with_defaults() {
        let cfg = MediatorConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.scope, "ORG/FCY/YRD");
        assert_eq!(cfg.runtime.stop_grace, Duration::from_millis(250));
        assert_eq!(cfg.runtime.drain_grace, Duration::from_secs(1));
        assert_eq!(cfg.runtime.source_backoff.first, Duration::from_millis(100));
        assert_eq!(cfg.endpoints[0].timeout, Duration::from_secs(30));
        assert!(cfg.endpoints[0].transformer.is_some());
        assert!(cfg.flows[0].enabled);

        let canary = cfg.canary.as_ref().unwrap();
        assert!(!canary.is_enabled());
        assert_eq!(canary.interval, Duration::from_secs(5));
        assert_eq!(canary.cdc_frequency, 3);

        assert_eq!(cfg.cdc.table("inv_wi").unwrap().threshold, Duration::from_secs(4));
    }

    #[test]
    fn flow_validation_is_scoped_to_the_flow() {
        let cfg = MediatorConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.validate_flow(&cfg.flows[0]).unwrap().name, "tos");

        let err = cfg.validate_flow(&cfg.flows[1]).unwrap_err();
        assert_eq!(err.to_string(), "broken: No Endpoint connector found (bad reference 'nowhere')");
    }

    #[test]
    fn empty_document_has_nothing_to_run() {
        let cfg = MediatorConfig::from_toml_str("").unwrap();
        assert!(cfg.is_empty());
        assert_eq!(cfg.runtime.lookup_interval, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = MediatorConfig::load("/nonexistent/mediator.toml").unwrap_err();
        assert!(matches!(err, MediatorError::Io { .. }));
    }
}
