use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Connection refused by {url}")]
    ConnectionRefused { url: String },

    #[error("Host not found: {url}")]
    HostNotFound { url: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Agent returned HTTP {status}: {body}")]
    AgentStatus { status: u16, body: String },

    #[error("No compatible request format found after trying {tried} variants")]
    IncompatibleProtocol { tried: usize },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid header '{header}': expected 'Name: value'")]
    InvalidHeader { header: String },

    #[error("Invalid HTTP method: {method}")]
    InvalidMethod { method: String },

    #[error("Hallucination judge is not available on this backend")]
    JudgeUnavailable,

    #[error("Backend returned HTTP {status} for {path}: {body}")]
    Backend {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Failed to persist result: {message}")]
    Persistence { message: String },

    #[error("Run setup failed: {message}")]
    Setup { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Taxonomy class of an [`EvalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Validation,
    Scoring,
    Persistence,
    Setup,
}

impl EvalError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EvalError::ConnectionRefused { .. }
            | EvalError::HostNotFound { .. }
            | EvalError::Timeout { .. }
            | EvalError::Network(_) => ErrorCategory::Connection,
            EvalError::AgentStatus { .. }
            | EvalError::IncompatibleProtocol { .. }
            | EvalError::InvalidResponse { .. }
            | EvalError::Serialization(_) => ErrorCategory::Protocol,
            EvalError::InvalidConfig { .. }
            | EvalError::InvalidHeader { .. }
            | EvalError::InvalidMethod { .. }
            | EvalError::Io(_) => ErrorCategory::Validation,
            EvalError::JudgeUnavailable => ErrorCategory::Scoring,
            EvalError::Backend { .. } | EvalError::Persistence { .. } => {
                ErrorCategory::Persistence
            }
            EvalError::Setup { .. } => ErrorCategory::Setup,
        }
    }

    /// Whether offering the operator a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            EvalError::ConnectionRefused { .. }
            | EvalError::Timeout { .. }
            | EvalError::Network(_)
            | EvalError::Persistence { .. }
            | EvalError::Setup { .. } => true,
            EvalError::AgentStatus { status, .. } | EvalError::Backend { status, .. } => {
                *status >= 500 || *status == 429
            }
            _ => false,
        }
    }

    /// Short operator-facing message. `Display` carries the technical detail.
    pub fn user_message(&self) -> String {
        match self {
            EvalError::ConnectionRefused { .. } => {
                "Connection refused. Is the agent running and listening on that port?".to_string()
            }
            EvalError::HostNotFound { .. } => {
                "Host not found. Check the endpoint address for typos.".to_string()
            }
            EvalError::Timeout { .. } => {
                "The endpoint did not answer in time. It may be overloaded or unreachable."
                    .to_string()
            }
            EvalError::Network(_) => "Network error while contacting the endpoint.".to_string(),
            EvalError::AgentStatus { status, .. } => {
                format!("The agent answered with HTTP {}.", status)
            }
            EvalError::IncompatibleProtocol { tried } => format!(
                "None of the {} request formats worked. Provide a custom body template.",
                tried
            ),
            EvalError::InvalidResponse { .. } | EvalError::Serialization(_) => {
                "The response could not be understood.".to_string()
            }
            EvalError::InvalidConfig { message } => format!("Invalid configuration: {}", message),
            EvalError::InvalidHeader { header } => {
                format!("Header '{}' must look like 'Name: value'.", header)
            }
            EvalError::InvalidMethod { method } => format!("'{}' is not an HTTP method.", method),
            EvalError::JudgeUnavailable => {
                "Hallucination scoring is not available on this backend.".to_string()
            }
            EvalError::Backend { status, .. } => {
                format!("The evaluation backend answered with HTTP {}.", status)
            }
            EvalError::Persistence { .. } => "Could not store the result.".to_string(),
            EvalError::Setup { .. } => "Could not start the evaluation run.".to_string(),
            EvalError::Io(e) => format!("File error: {}", e),
        }
    }

    /// Maps a transport failure against `url` onto the connection classes.
    pub fn from_transport(err: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            return EvalError::Timeout {
                url: url.to_string(),
                timeout,
            };
        }

        if err.is_connect() {
            if source_chain_mentions_dns(&err) {
                return EvalError::HostNotFound {
                    url: url.to_string(),
                };
            }
            if source_chain_has_refused(&err) {
                return EvalError::ConnectionRefused {
                    url: url.to_string(),
                };
            }
        }

        EvalError::Network(err)
    }

    /// Refused and host-not-found do not depend on the request body.
    pub fn is_fatal_for_negotiation(&self) -> bool {
        matches!(
            self,
            EvalError::ConnectionRefused { .. } | EvalError::HostNotFound { .. }
        )
    }
}

fn source_chain_has_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if e.to_string().to_lowercase().contains("connection refused") {
            return true;
        }
        current = e.source();
    }
    false
}

fn source_chain_mentions_dns(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        current = e.source();
    }
    false
}
