//! # Event relay
//!
//! One session per inbound record of a flow's source channel:
//!
//! ```text
//! BusRecord ─► transform_request(value, scope) ─► endpoint.send
//!          ─► SOAP fault? ─► transform_response ─► publish(response_channel, record.key)
//! ```
//!
//! No transformer configured means both directions pass through unchanged.
//! Failures are recorded on the session; the record is not retried.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::controller::{SessionFactory, WorkItem};
use crate::endpoint::{Endpoint, Transformer, detect_fault};
use crate::error::SessionError;
use crate::messaging::{BusRecord, MessageBus};
use crate::session::{Session, SessionContext};

/// Builds a [`RelaySession`] for every inbound record of one flow.
pub struct RelayFactory {
    flow: String,
    scope: String,
    response_channel: String,
    endpoint: Arc<dyn Endpoint>,
    transformer: Option<Arc<dyn Transformer>>,
    bus: Arc<dyn MessageBus>,
}

impl RelayFactory {
    pub fn new(
        flow: impl Into<String>,
        scope: impl Into<String>,
        response_channel: impl Into<String>,
        endpoint: Arc<dyn Endpoint>,
        transformer: Option<Arc<dyn Transformer>>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            flow: flow.into(),
            scope: scope.into(),
            response_channel: response_channel.into(),
            endpoint,
            transformer,
            bus,
        }
    }
}

impl SessionFactory for RelayFactory {
    fn create(&self, item: WorkItem) -> Option<Arc<dyn Session>> {
        let WorkItem::Record(record) = item else {
            warn!(flow = %self.flow, "relay flow got a tick, ignored");
            return None;
        };
        Some(Arc::new(RelaySession {
            record,
            scope: self.scope.clone(),
            response_channel: self.response_channel.clone(),
            endpoint: Arc::clone(&self.endpoint),
            transformer: self.transformer.clone(),
            bus: Arc::clone(&self.bus),
        }))
    }
}

pub struct RelaySession {
    record: BusRecord,
    scope: String,
    response_channel: String,
    endpoint: Arc<dyn Endpoint>,
    transformer: Option<Arc<dyn Transformer>>,
    bus: Arc<dyn MessageBus>,
}

#[async_trait]
impl Session for RelaySession {
    async fn execute(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let key = self.record.key.as_str();
        if self.record.value.trim().is_empty() {
            return Err(SessionError::parse(format!("empty payload for key '{key}'")));
        }

        let body = match &self.transformer {
            Some(t) => t.transform_request(&self.record.value, &self.scope),
            None => self.record.value.clone(),
        };
        let raw = self.endpoint.send(&body).await?;

        if let Some(fault) = detect_fault(&raw) {
            return Err(SessionError::Fault { fault });
        }
        let payload = match &self.transformer {
            Some(t) => t.transform_response(&raw)?,
            None => raw,
        };

        self.bus.publish(&self.response_channel, key, &payload).await?;
        debug!(session = %ctx.id(), key, channel = %self.response_channel, "relayed");
        ctx.set_message(format!("relayed '{key}' via {}", self.endpoint.name()));
        Ok(())
    }
}
