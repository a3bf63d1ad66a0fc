use crate::config::TransformerConfig;
use crate::error::{ConfigError, SessionError};

/// Maps a payload to the wire format of an endpoint and back.
pub trait Transformer: Send + Sync + 'static {
    /// Wraps `body` for the wire; `scope` addresses the target inside the TOS.
    fn transform_request(&self, body: &str, scope: &str) -> String;

    /// Extracts the payload from a raw response.
    fn transform_response(&self, raw: &str) -> Result<String, SessionError>;
}

/// Template-driven transformer.
///
/// Requests are rendered from a template with `{body}` and `{scope}`
/// placeholders. Responses are cut between optional start/end markers and
/// optionally XML-unescaped (payloads nested as text inside an envelope).
#[derive(Clone, Debug)]
pub struct TemplateTransformer {
    template: String,
    response_start: Option<String>,
    response_end: Option<String>,
    unescape_xml: bool,
}

impl TemplateTransformer {
    pub fn from_config(owner: &str, config: &TransformerConfig) -> Result<Self, ConfigError> {
        if !config.request_template.contains("{body}") {
            return Err(ConfigError::InvalidTransformer {
                owner: owner.to_string(),
                reason: "request template lacks a {body} placeholder".into(),
            });
        }
        if config.response_start.is_some() != config.response_end.is_some() {
            return Err(ConfigError::InvalidTransformer {
                owner: owner.to_string(),
                reason: "response_start and response_end must be set together".into(),
            });
        }
        Ok(Self {
            template: config.request_template.clone(),
            response_start: config.response_start.clone(),
            response_end: config.response_end.clone(),
            unescape_xml: config.unescape_xml,
        })
    }
}

impl Transformer for TemplateTransformer {
    fn transform_request(&self, body: &str, scope: &str) -> String {
        // Scope first: a body containing "{scope}" must stay untouched.
        self.template.replace("{scope}", scope).replace("{body}", body)
    }

    fn transform_response(&self, raw: &str) -> Result<String, SessionError> {
        let payload = match (&self.response_start, &self.response_end) {
            (Some(open), Some(close)) => {
                let start = raw
                    .find(open.as_str())
                    .map(|i| i + open.len())
                    .ok_or_else(|| SessionError::parse(format!("'{open}' not found in response")))?;
                let len = raw[start..]
                    .find(close.as_str())
                    .ok_or_else(|| SessionError::parse(format!("'{close}' not found in response")))?;
                raw[start..start + len].trim()
            }
            _ => raw,
        };
        if self.unescape_xml {
            Ok(unescape(payload))
        } else {
            Ok(payload.to_string())
        }
    }
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
