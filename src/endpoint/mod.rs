//! # Endpoints
//!
//! Outbound request/response collaborators used by relay and probe sessions.
//!
//! - [`Endpoint`] sends a wire body and returns the raw response body.
//! - [`HttpEndpoint`] is the `reqwest` implementation (POST, optional `SOAPAction`).
//! - [`Transformer`] maps a payload to a wire body and a raw response back.
//! - [`detect_fault`] recognises SOAP faults in a raw response.
//!
//! ## Rules
//! - Transport failures and non-2xx statuses are errors, never empty bodies.
//! - No transformer configured means the payload passes through unchanged.

mod http;
mod soap;
mod transform;

pub use http::HttpEndpoint;
pub use soap::detect_fault;
pub use transform::{TemplateTransformer, Transformer};

use async_trait::async_trait;

use crate::error::EndpointError;

/// Request/response collaborator.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Human-readable target, used in reports.
    fn describe(&self) -> String;

    /// Sends `body` and returns the raw response body.
    async fn send(&self, body: &str) -> Result<String, EndpointError>;
}
