//! Error types used by the mediator runtime and its sessions.
//!
//! This module defines the error enums shared across the crate:
//!
//! - [`SessionError`] raised by a single unit of work; recorded as the session's failure reason.
//! - [`CorrelationError`] raised while bridging a published request to its response.
//! - [`BusError`] raised by the message bus collaborator.
//! - [`EndpointError`] raised by HTTP/SOAP endpoints.
//! - [`ConfigError`] a configuration problem scoped to one flow or connector.
//! - [`ControllerError`] lifecycle misuse of a controller.
//! - [`MediatorError`] startup errors that abort the process.
//!
//! Every type provides an `as_label` helper for logging.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by session execution.
///
/// Every variant ends the session as `FAILED`; the rendered message becomes
/// the session's failure reason.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SessionError {
    /// A wait exceeded its deadline.
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What the session was waiting for.
        what: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Bus or endpoint transport failed.
    #[error("transport failure: {error}")]
    Transport {
        /// The underlying error message.
        error: String,
    },

    /// The far side answered with a SOAP fault.
    #[error("SOAP fault in response: {fault}")]
    Fault {
        /// Extracted `faultstring`.
        fault: String,
    },

    /// Payload could not be decoded or transformed.
    #[error("malformed payload: {error}")]
    Parse {
        /// The underlying error message.
        error: String,
    },

    /// Correlated round trip failed.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// Session was interrupted by its controller.
    #[error("session interrupted")]
    Canceled,

    /// Any other failure.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl SessionError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use tos_mediator::SessionError;
    ///
    /// let err = SessionError::Fault { fault: "boom".into() };
    /// assert_eq!(err.as_label(), "session_fault");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::Timeout { .. } => "session_timeout",
            SessionError::Transport { .. } => "session_transport",
            SessionError::Fault { .. } => "session_fault",
            SessionError::Parse { .. } => "session_parse",
            SessionError::Correlation(e) => e.as_label(),
            SessionError::Canceled => "session_canceled",
            SessionError::Fail { .. } => "session_failed",
        }
    }

    /// Shorthand for [`SessionError::Parse`].
    pub fn parse(error: impl std::fmt::Display) -> Self {
        SessionError::Parse {
            error: error.to_string(),
        }
    }
}

impl From<BusError> for SessionError {
    fn from(e: BusError) -> Self {
        SessionError::Transport {
            error: e.to_string(),
        }
    }
}

impl From<EndpointError> for SessionError {
    fn from(e: EndpointError) -> Self {
        match e {
            EndpointError::Timeout { endpoint, timeout } => SessionError::Timeout {
                what: format!("endpoint '{endpoint}'"),
                timeout,
            },
            other => SessionError::Transport {
                error: other.to_string(),
            },
        }
    }
}

/// # Errors produced by the correlation registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A pending request already exists for this key.
    #[error("correlation key '{key}' is already pending")]
    DuplicateKey {
        /// The offending key.
        key: String,
    },

    /// No response arrived before the deadline.
    #[error("no response for '{key}' within {timeout:?}")]
    Timeout {
        /// Correlation key.
        key: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The waiting caller was interrupted.
    #[error("wait for '{key}' interrupted")]
    Canceled {
        /// Correlation key.
        key: String,
    },
}

impl CorrelationError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            CorrelationError::DuplicateKey { .. } => "correlation_duplicate_key",
            CorrelationError::Timeout { .. } => "correlation_timeout",
            CorrelationError::Canceled { .. } => "correlation_canceled",
        }
    }
}

/// # Errors produced by the message bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Channel is closed; no further records will arrive.
    #[error("channel '{channel}' closed")]
    Closed {
        /// Channel name.
        channel: String,
    },

    /// Publish was not acknowledged.
    #[error("publish to '{channel}' failed: {error}")]
    Publish {
        /// Channel name.
        channel: String,
        /// The underlying error message.
        error: String,
    },

    /// Broker/bus cannot be reached.
    #[error("bus unavailable: {error}")]
    Unavailable {
        /// The underlying error message.
        error: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Closed { .. } => "bus_closed",
            BusError::Publish { .. } => "bus_publish",
            BusError::Unavailable { .. } => "bus_unavailable",
        }
    }
}

/// # Errors produced by endpoints.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Request could not be sent or the body could not be read.
    #[error("endpoint '{endpoint}' transport error: {error}")]
    Transport {
        /// Endpoint name.
        endpoint: String,
        /// The underlying error message.
        error: String,
    },

    /// Non-success HTTP status.
    #[error("endpoint '{endpoint}' answered {status}: {body}")]
    Status {
        /// Endpoint name.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// No answer within the configured timeout.
    #[error("endpoint '{endpoint}' timed out after {timeout:?}")]
    Timeout {
        /// Endpoint name.
        endpoint: String,
        /// Configured timeout.
        timeout: Duration,
    },
}

impl EndpointError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EndpointError::Transport { .. } => "endpoint_transport",
            EndpointError::Status { .. } => "endpoint_status",
            EndpointError::Timeout { .. } => "endpoint_timeout",
        }
    }
}

/// # Configuration problems scoped to one flow or connector.
///
/// These never abort the process: the affected controller is not created,
/// the problem is logged and listed in the manager's report.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Flow or canary references an endpoint that is not configured.
    #[error("{owner}: No Endpoint connector found (bad reference '{endpoint}')")]
    UnknownEndpoint {
        /// Flow or controller name.
        owner: String,
        /// Missing endpoint name.
        endpoint: String,
    },

    /// A required channel name is empty.
    #[error("{owner}: missing {what} channel")]
    MissingChannel {
        /// Flow or controller name.
        owner: String,
        /// Which channel (`source`, `request`, ...).
        what: &'static str,
    },

    /// Two flows share a name.
    #[error("flow '{flow}' is defined more than once")]
    DuplicateFlow {
        /// Flow name.
        flow: String,
    },

    /// Transformer template is unusable.
    #[error("{owner}: invalid transformer: {reason}")]
    InvalidTransformer {
        /// Endpoint name.
        owner: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Canary has neither an endpoint nor bus channels to send probes over.
    #[error("{owner}: no probe transport configured")]
    MissingTransport {
        /// Controller name.
        owner: String,
    },

    /// Endpoint client could not be built.
    #[error("{owner}: cannot build endpoint client: {error}")]
    Client {
        /// Endpoint name.
        owner: String,
        /// The underlying error message.
        error: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::UnknownEndpoint { .. } => "config_unknown_endpoint",
            ConfigError::MissingChannel { .. } => "config_missing_channel",
            ConfigError::DuplicateFlow { .. } => "config_duplicate_flow",
            ConfigError::InvalidTransformer { .. } => "config_invalid_transformer",
            ConfigError::MissingTransport { .. } => "config_missing_transport",
            ConfigError::Client { .. } => "config_client",
        }
    }
}

/// # Controller lifecycle misuse.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// `run` was called on a controller that already ran or is running.
    #[error("controller '{name}' already started")]
    AlreadyStarted {
        /// Controller name.
        name: String,
    },

    /// `run` was called on a stopped controller; build a fresh one instead.
    #[error("controller '{name}' is stopped and cannot be restarted")]
    Stopped {
        /// Controller name.
        name: String,
    },
}

impl ControllerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControllerError::AlreadyStarted { .. } => "controller_already_started",
            ControllerError::Stopped { .. } => "controller_stopped",
        }
    }
}

/// # Unrecoverable startup errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MediatorError {
    /// Configuration file could not be read.
    #[error("cannot read configuration {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`MediatorConfig`](crate::MediatorConfig).
    #[error("cannot parse configuration {path:?}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration defines no flows, no canary and no CDC tables.
    #[error("no configuration: nothing to mediate")]
    NoConfiguration,
}

impl MediatorError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            MediatorError::Io { .. } => "mediator_config_io",
            MediatorError::Parse { .. } => "mediator_config_parse",
            MediatorError::NoConfiguration => "mediator_no_configuration",
        }
    }
}
