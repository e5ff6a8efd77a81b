use crate::custom::CustomEndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::{EvalError, EvalResult};
use crate::extract::{self, Extraction};
use crate::variants;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Placeholder used when a negotiated variant is recorded as a template.
pub const QUESTION_PLACEHOLDER: &str = "{{question}}";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    pub response_field: Option<String>,
}

impl AgentRequest {
    pub fn json(body: Value) -> Self {
        Self {
            method: Method::POST,
            headers: BTreeMap::new(),
            body: RequestBody::Json(body),
            response_field: None,
        }
    }

    pub fn has_content_type(&self) -> bool {
        self.headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
    }
}

/// The request contract used for every call to one endpoint during a run.
///
/// Produced by the prober (or supplied by the operator) and passed explicitly
/// to the evaluator; there is no process-wide cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiatedProtocol {
    Variant { index: usize, label: String },
    Custom { config: CustomEndpointConfig },
}

impl NegotiatedProtocol {
    pub fn variant(index: usize) -> EvalResult<Self> {
        let label = variants::generate(QUESTION_PLACEHOLDER)
            .into_iter()
            .nth(index)
            .map(|v| v.label)
            .ok_or_else(|| EvalError::InvalidConfig {
                message: format!(
                    "Variant index {} out of range (0..{})",
                    index,
                    variants::VARIANT_COUNT
                ),
            })?;
        Ok(NegotiatedProtocol::Variant { index, label })
    }

    pub fn custom(config: CustomEndpointConfig) -> Self {
        NegotiatedProtocol::Custom { config }
    }

    pub fn variant_index(&self) -> Option<usize> {
        match self {
            NegotiatedProtocol::Variant { index, .. } => Some(*index),
            NegotiatedProtocol::Custom { .. } => None,
        }
    }

    pub fn request_for(&self, question: &str) -> EvalResult<AgentRequest> {
        match self {
            NegotiatedProtocol::Variant { index, .. } => {
                let variant = variants::generate(question)
                    .into_iter()
                    .nth(*index)
                    .ok_or_else(|| EvalError::InvalidConfig {
                        message: format!("Variant index {} out of range", index),
                    })?;
                Ok(AgentRequest::json(variant.body))
            }
            NegotiatedProtocol::Custom { config } => Ok(AgentRequest {
                method: config.http_method()?,
                headers: config.headers.clone(),
                body: config.render_body(question),
                response_field: config.response_field.clone(),
            }),
        }
    }

    /// Body template with [`QUESTION_PLACEHOLDER`] in place of the question.
    pub fn body_template(&self) -> String {
        match self {
            NegotiatedProtocol::Variant { index, .. } => {
                variants::template_for(*index, QUESTION_PLACEHOLDER).unwrap_or_default()
            }
            NegotiatedProtocol::Custom { config } => config.body_template.clone(),
        }
    }

    /// Request contract as stored alongside the ephemeral subject.
    pub fn advanced_payload(&self) -> Value {
        match self {
            NegotiatedProtocol::Variant { .. } => json!({
                "bodyTemplate": self.body_template(),
                "method": "POST",
            }),
            NegotiatedProtocol::Custom { config } => {
                serde_json::to_value(config).unwrap_or_else(|_| json!({}))
            }
        }
    }
}

impl fmt::Display for NegotiatedProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiatedProtocol::Variant { index, label } => {
                write!(f, "variant {} ({})", index + 1, label)
            }
            NegotiatedProtocol::Custom { config } => {
                write!(f, "custom {} {}", config.method, config.body_template)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub status: u16,
    pub raw: String,
    pub extraction: Extraction,
}

impl AgentReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn answer(&self) -> &str {
        &self.extraction.text
    }
}

/// HTTP client bound to a single agent endpoint.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl AgentClient {
    pub fn new(endpoint: Endpoint) -> EvalResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| EvalError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends `request` and returns whatever came back, including error statuses.
    pub async fn send(&self, request: &AgentRequest, timeout: Duration) -> EvalResult<AgentReply> {
        let url = self.endpoint.url();
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Text(text) => {
                if request.has_content_type() {
                    builder.body(text.clone())
                } else {
                    builder
                        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                        .body(text.clone())
                }
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| EvalError::from_transport(e, url, timeout))?;

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| EvalError::from_transport(e, url, timeout))?;

        let payload = extract::decode_body(&raw);
        let extraction = match &request.response_field {
            Some(path) => extract::extract_path(&payload, path),
            None => extract::extract(&payload),
        };

        debug!(
            "Agent {} answered {} ({} bytes, {:?})",
            url,
            status,
            raw.len(),
            extraction.source
        );

        Ok(AgentReply {
            status,
            raw,
            extraction,
        })
    }

    /// Asks `question` using `protocol`; error statuses become [`EvalError::AgentStatus`].
    pub async fn ask(
        &self,
        protocol: &NegotiatedProtocol,
        question: &str,
        timeout: Duration,
    ) -> EvalResult<AgentReply> {
        let request = protocol.request_for(question)?;
        let reply = self.send(&request, timeout).await?;

        if !reply.is_success() {
            return Err(EvalError::AgentStatus {
                status: reply.status,
                body: reply.raw.chars().take(200).collect(),
            });
        }

        Ok(reply)
    }
}
