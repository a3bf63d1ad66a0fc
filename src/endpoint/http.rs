use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::Endpoint;
use crate::config::EndpointConfig;
use crate::error::{ConfigError, EndpointError};

/// HTTP endpoint: one POST per call, bounded by the configured timeout.
pub struct HttpEndpoint {
    name: String,
    url: String,
    content_type: String,
    soap_action: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Client {
                owner: config.name.clone(),
                error: e.to_string(),
            })?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            content_type: config.content_type.clone(),
            soap_action: config.soap_action.clone(),
            timeout: config.timeout,
            client,
        })
    }

    fn transport(&self, e: reqwest::Error) -> EndpointError {
        if e.is_timeout() {
            EndpointError::Timeout {
                endpoint: self.name.clone(),
                timeout: self.timeout,
            }
        } else {
            EndpointError::Transport {
                endpoint: self.name.clone(),
                error: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.url)
    }

    async fn send(&self, body: &str) -> Result<String, EndpointError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, &self.content_type)
            .body(body.to_string());
        if let Some(action) = &self.soap_action {
            request = request.header("SOAPAction", action);
        }

        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport(e))?;
        debug!(endpoint = %self.name, status = status.as_u16(), bytes = text.len(), "endpoint answered");

        if !status.is_success() {
            return Err(EndpointError::Status {
                endpoint: self.name.clone(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> EndpointConfig {
        EndpointConfig {
            name: "tos".into(),
            url: url.into(),
            timeout: Duration::from_millis(300),
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn describe_names_target() {
        let ep = HttpEndpoint::from_config(&config("http://127.0.0.1:9/api")).unwrap();
        assert_eq!(ep.name(), "tos");
        assert_eq!(ep.describe(), "tos (http://127.0.0.1:9/api)");
    }

    #[tokio::test]
    async fn unreachable_target_is_an_error_not_an_empty_body() {
        // Port 9 (discard) is closed on test hosts; connect fails fast.
        let ep = HttpEndpoint::from_config(&config("http://127.0.0.1:9/api")).unwrap();
        let err = ep.send("<ping/>").await.unwrap_err();
        assert!(matches!(
            err,
            EndpointError::Transport { .. } | EndpointError::Timeout { .. }
        ));
    }
}
