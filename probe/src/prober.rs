//! Connection testing and request-format negotiation.
//!
//! Variants are tried strictly in order, one request at a time:
//! `Idle -> Probing(i) -> Success | Probing(i + 1) | Exhausted`.
//! Connection refused and host-not-found stop the search immediately, since
//! no other body would reach the server either.

use crate::agent::{AgentClient, AgentRequest, NegotiatedProtocol};
use crate::config::ProbeConfig;
use crate::custom::CustomEndpointConfig;
use crate::error::{EvalError, EvalResult};
use crate::variants;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a probe did not find a working request format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    ConnectionRefused,
    HostNotFound,
    TimedOut,
    HttpStatus { status: u16 },
    InvalidResponse { detail: String },
    InvalidConfig { detail: String },
    NoCompatibleFormat { tried: usize },
}

impl ProbeFailure {
    pub fn remediation(&self) -> &'static str {
        match self {
            ProbeFailure::ConnectionRefused => {
                "Start the agent or check the port; nothing is listening at that address."
            }
            ProbeFailure::HostNotFound => "Check the hostname; it could not be resolved.",
            ProbeFailure::TimedOut => {
                "The agent is slow or unreachable; check firewalls or try again later."
            }
            ProbeFailure::HttpStatus { .. } => {
                "The endpoint rejected the request; check the path and any required headers."
            }
            ProbeFailure::InvalidResponse { .. } => {
                "The endpoint answered without a usable reply; check the response field."
            }
            ProbeFailure::InvalidConfig { .. } => {
                "Fix the custom method, headers or body template; no request was sent."
            }
            ProbeFailure::NoCompatibleFormat { .. } => {
                "Supply a custom body template and response field for this agent."
            }
        }
    }

    /// The error a caller sees when it needs this failure as an [`EvalError`].
    pub fn to_error(&self, url: &str, elapsed: Duration) -> EvalError {
        let url = url.to_string();
        match self {
            ProbeFailure::ConnectionRefused => EvalError::ConnectionRefused { url },
            ProbeFailure::HostNotFound => EvalError::HostNotFound { url },
            ProbeFailure::TimedOut => EvalError::Timeout {
                url,
                timeout: elapsed,
            },
            ProbeFailure::HttpStatus { status } => EvalError::AgentStatus {
                status: *status,
                body: String::new(),
            },
            ProbeFailure::InvalidResponse { detail } => EvalError::InvalidResponse {
                message: detail.clone(),
            },
            ProbeFailure::InvalidConfig { detail } => EvalError::InvalidConfig {
                message: detail.clone(),
            },
            ProbeFailure::NoCompatibleFormat { tried } => {
                EvalError::IncompatibleProtocol { tried: *tried }
            }
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::ConnectionRefused => write!(f, "connection refused"),
            ProbeFailure::HostNotFound => write!(f, "host not found"),
            ProbeFailure::TimedOut => write!(f, "timed out"),
            ProbeFailure::HttpStatus { status } => write!(f, "HTTP {}", status),
            ProbeFailure::InvalidResponse { detail } => write!(f, "invalid response: {}", detail),
            ProbeFailure::InvalidConfig { detail } => write!(f, "invalid configuration: {}", detail),
            ProbeFailure::NoCompatibleFormat { tried } => write!(
                f,
                "no compatible format found after trying {} variants",
                tried
            ),
        }
    }
}

/// Result of one request during a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched,
    Status { status: u16 },
    EmptyAnswer { status: u16 },
    Transport { failure: ProbeFailure },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeAttempt {
    /// `None` for a custom-configured request.
    pub variant_index: Option<usize>,
    pub label: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProbeVerdict {
    Compatible {
        protocol: NegotiatedProtocol,
        sample: String,
        /// The sample is the stringified payload, not a recognised answer field.
        #[serde(default)]
        fallback: bool,
    },
    Incompatible(ProbeFailure),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub message: String,
    pub verdict: ProbeVerdict,
    pub attempts: Vec<ProbeAttempt>,
    pub duration: Duration,
}

impl ProbeOutcome {
    pub fn success(&self) -> bool {
        matches!(self.verdict, ProbeVerdict::Compatible { .. })
    }

    pub fn protocol(&self) -> Option<&NegotiatedProtocol> {
        match &self.verdict {
            ProbeVerdict::Compatible { protocol, .. } => Some(protocol),
            ProbeVerdict::Incompatible(_) => None,
        }
    }

    pub fn into_protocol(self) -> Option<NegotiatedProtocol> {
        match self.verdict {
            ProbeVerdict::Compatible { protocol, .. } => Some(protocol),
            ProbeVerdict::Incompatible(_) => None,
        }
    }

    pub fn variant_index(&self) -> Option<usize> {
        self.protocol().and_then(NegotiatedProtocol::variant_index)
    }

    pub fn sample(&self) -> Option<&str> {
        match &self.verdict {
            ProbeVerdict::Compatible { sample, .. } => Some(sample),
            ProbeVerdict::Incompatible(_) => None,
        }
    }

    /// Whether the sample came from the stringify fallback.
    pub fn sample_is_fallback(&self) -> bool {
        matches!(self.verdict, ProbeVerdict::Compatible { fallback: true, .. })
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match &self.verdict {
            ProbeVerdict::Compatible { .. } => None,
            ProbeVerdict::Incompatible(failure) => Some(failure),
        }
    }

    pub fn error(&self) -> Option<EvalError> {
        self.failure()
            .map(|failure| failure.to_error(&self.endpoint, self.duration))
    }

    /// Converts a failed probe into an error for callers that need one.
    pub fn into_result(self) -> EvalResult<NegotiatedProtocol> {
        match self.verdict {
            ProbeVerdict::Compatible { protocol, .. } => Ok(protocol),
            ProbeVerdict::Incompatible(failure) => {
                Err(failure.to_error(&self.endpoint, self.duration))
            }
        }
    }
}

fn failure_for(err: &EvalError) -> ProbeFailure {
    match err {
        EvalError::ConnectionRefused { .. } => ProbeFailure::ConnectionRefused,
        EvalError::HostNotFound { .. } => ProbeFailure::HostNotFound,
        EvalError::Timeout { .. } => ProbeFailure::TimedOut,
        EvalError::AgentStatus { status, .. } => ProbeFailure::HttpStatus { status: *status },
        other => ProbeFailure::InvalidResponse {
            detail: other.to_string(),
        },
    }
}

const ELLIPSIS: &str = "...";

/// Caps `text` at `max_chars`, ellipsis included.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let keep = max_chars.saturating_sub(ELLIPSIS.len());
        let mut sample: String = text.chars().take(keep).collect();
        sample.push_str(ELLIPSIS);
        sample
    }
}

/// A matched answer, cut to the sample length.
struct Sample {
    text: String,
    fallback: bool,
}

pub struct Prober {
    client: AgentClient,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(client: AgentClient, config: ProbeConfig) -> EvalResult<Self> {
        config
            .validate()
            .map_err(|message| EvalError::InvalidConfig { message })?;
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    /// Tests the endpoint. With a custom config exactly one request is sent;
    /// otherwise variants are negotiated using `question`.
    pub async fn probe(
        &self,
        question: &str,
        custom: Option<&CustomEndpointConfig>,
    ) -> ProbeOutcome {
        match custom {
            Some(config) => self.probe_custom(question, config).await,
            None => self.negotiate(question).await,
        }
    }

    pub async fn probe_custom(&self, question: &str, config: &CustomEndpointConfig) -> ProbeOutcome {
        let started = Instant::now();
        let protocol = NegotiatedProtocol::custom(config.clone());

        let request = match config.validate().and_then(|_| protocol.request_for(question)) {
            Ok(request) => request,
            Err(e) => {
                return self.finish(
                    started,
                    Vec::new(),
                    ProbeVerdict::Incompatible(ProbeFailure::InvalidConfig {
                        detail: e.to_string(),
                    }),
                )
            }
        };

        let (outcome, sample) = self.attempt(&request).await;
        let attempts = vec![ProbeAttempt {
            variant_index: None,
            label: "custom".to_string(),
            outcome: outcome.clone(),
        }];

        let verdict = match (outcome, sample) {
            (AttemptOutcome::Matched, Some(sample)) => ProbeVerdict::Compatible {
                protocol,
                sample: sample.text,
                fallback: sample.fallback,
            },
            (AttemptOutcome::Transport { failure }, _) => ProbeVerdict::Incompatible(failure),
            (AttemptOutcome::Status { status }, _) => {
                ProbeVerdict::Incompatible(ProbeFailure::HttpStatus { status })
            }
            (_, _) => ProbeVerdict::Incompatible(ProbeFailure::InvalidResponse {
                detail: "empty answer".to_string(),
            }),
        };

        self.finish(started, attempts, verdict)
    }

    pub async fn negotiate(&self, question: &str) -> ProbeOutcome {
        let started = Instant::now();
        let candidates = variants::generate(question);
        let total = candidates.len();
        let mut attempts = Vec::with_capacity(total);

        for (index, variant) in candidates.into_iter().enumerate() {
            debug!("Probing variant {}/{} ({})", index + 1, total, variant.label);

            let request = AgentRequest::json(variant.body);
            let (outcome, sample) = self.attempt(&request).await;
            attempts.push(ProbeAttempt {
                variant_index: Some(index),
                label: variant.label.clone(),
                outcome: outcome.clone(),
            });

            match outcome {
                AttemptOutcome::Matched => {
                    let protocol = NegotiatedProtocol::Variant {
                        index,
                        label: variant.label,
                    };
                    let (sample, fallback) = sample
                        .map(|s| (s.text, s.fallback))
                        .unwrap_or_default();
                    let verdict = ProbeVerdict::Compatible {
                        protocol,
                        sample,
                        fallback,
                    };
                    return self.finish(started, attempts, verdict);
                }
                AttemptOutcome::Transport { failure }
                    if matches!(
                        failure,
                        ProbeFailure::ConnectionRefused | ProbeFailure::HostNotFound
                    ) =>
                {
                    warn!("Stopping negotiation: {}", failure);
                    return self.finish(started, attempts, ProbeVerdict::Incompatible(failure));
                }
                other => {
                    debug!("Variant {} failed ({:?}), trying next", index + 1, other);
                }
            }
        }

        let failure = exhausted_failure(&attempts);
        self.finish(started, attempts, ProbeVerdict::Incompatible(failure))
    }

    async fn attempt(&self, request: &AgentRequest) -> (AttemptOutcome, Option<Sample>) {
        match self.client.send(request, self.config.timeout).await {
            Ok(reply) if !reply.is_success() => (
                AttemptOutcome::Status {
                    status: reply.status,
                },
                None,
            ),
            Ok(reply) if !reply.extraction.is_meaningful() => (
                AttemptOutcome::EmptyAnswer {
                    status: reply.status,
                },
                None,
            ),
            Ok(reply) => {
                let fallback = reply.extraction.is_fallback();
                if fallback {
                    warn!("No answer field recognised, accepting the stringified response");
                }
                let sample = Sample {
                    text: truncate(reply.answer(), self.config.sample_length),
                    fallback,
                };
                (AttemptOutcome::Matched, Some(sample))
            }
            Err(e) => (
                AttemptOutcome::Transport {
                    failure: failure_for(&e),
                },
                None,
            ),
        }
    }

    fn finish(
        &self,
        started: Instant,
        attempts: Vec<ProbeAttempt>,
        verdict: ProbeVerdict,
    ) -> ProbeOutcome {
        let url = self.client.endpoint().url();
        let message = match &verdict {
            ProbeVerdict::Compatible { protocol, .. } => {
                info!("Endpoint {} accepts {}", url, protocol);
                format!("Connected to {} using {}", url, protocol)
            }
            ProbeVerdict::Incompatible(failure) => {
                warn!("Probe of {} failed: {}", url, failure);
                format!("{}: {}. {}", url, failure, failure.remediation())
            }
        };

        ProbeOutcome {
            endpoint: url.to_string(),
            message,
            verdict,
            attempts,
            duration: started.elapsed(),
        }
    }
}

/// A uniform failure across every variant is reported as that failure.
fn exhausted_failure(attempts: &[ProbeAttempt]) -> ProbeFailure {
    let uniform = |expected: AttemptOutcome| {
        !attempts.is_empty() && attempts.iter().all(|a| a.outcome == expected)
    };

    if uniform(AttemptOutcome::Transport {
        failure: ProbeFailure::TimedOut,
    }) {
        ProbeFailure::TimedOut
    } else if uniform(AttemptOutcome::Status { status: 404 }) {
        ProbeFailure::HttpStatus { status: 404 }
    } else {
        ProbeFailure::NoCompatibleFormat {
            tried: attempts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use mockito::Matcher;
    use serde_json::json;

    fn prober_for(address: &str) -> Prober {
        let client = AgentClient::new(Endpoint::new(address)).unwrap();
        Prober::new(client, ProbeConfig::default().with_timeout(Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
        assert_eq!(truncate("abcdef", 6), "abcdef");
    }

    #[test]
    fn test_exhausted_failure_classification() {
        let attempt = |outcome| ProbeAttempt {
            variant_index: Some(0),
            label: "x".to_string(),
            outcome,
        };
        assert_eq!(
            exhausted_failure(&[attempt(AttemptOutcome::Status { status: 404 })]),
            ProbeFailure::HttpStatus { status: 404 }
        );
        assert_eq!(
            exhausted_failure(&[
                attempt(AttemptOutcome::Status { status: 404 }),
                attempt(AttemptOutcome::Status { status: 422 }),
            ]),
            ProbeFailure::NoCompatibleFormat { tried: 2 }
        );
    }

    #[tokio::test]
    async fn test_negotiation_finds_third_variant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"inputs": "ping"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output": "pong"}"#)
            .expect(1)
            .create_async()
            .await;

        let outcome = prober_for(&server.url()).negotiate("ping").await;

        assert!(outcome.success(), "{}", outcome.message);
        assert_eq!(outcome.variant_index(), Some(2));
        assert_eq!(outcome.sample(), Some("pong"));
        let tried: Vec<Option<usize>> = outcome.attempts.iter().map(|a| a.variant_index).collect();
        assert_eq!(tried, vec![Some(0), Some(1), Some(2)]);
        assert!(matches!(
            outcome.attempts[0].outcome,
            AttemptOutcome::Status { .. }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_a_match() {
        let mut server = mockito::Server::new_async().await;
        let _empty = server
            .mock("POST", "/")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let outcome = prober_for(&server.url()).negotiate("ping").await;

        assert!(!outcome.success());
        assert_eq!(
            outcome.failure(),
            Some(&ProbeFailure::NoCompatibleFormat {
                tried: variants::VARIANT_COUNT
            })
        );
        assert!(outcome
            .attempts
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::EmptyAnswer { status: 200 })));
    }

    #[tokio::test]
    async fn test_refused_connection_stops_immediately() {
        let outcome = prober_for("localhost:9").negotiate("ping").await;

        assert!(!outcome.success());
        assert_eq!(outcome.failure(), Some(&ProbeFailure::ConnectionRefused));
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_custom_probe_sends_single_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/agent")
            .match_header("authorization", "Bearer t")
            .match_body(Matcher::Json(json!({"q": "ping"})))
            .with_status(200)
            .with_body(r#"{"result": {"text": "pong"}}"#)
            .expect(1)
            .create_async()
            .await;

        let config = CustomEndpointConfig::new(r#"{"q": "{{question}}"}"#)
            .with_header("Authorization", "Bearer t")
            .with_response_field("result.text");
        let prober = prober_for(&format!("{}/agent", server.url()));
        let outcome = prober.probe("ping", Some(&config)).await;

        assert!(outcome.success(), "{}", outcome.message);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.variant_index(), None);
        assert_eq!(outcome.sample(), Some("pong"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_custom_probe_reports_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .create_async()
            .await;

        let config = CustomEndpointConfig::new(r#"{"q": "{{question}}"}"#);
        let outcome = prober_for(&server.url()).probe("ping", Some(&config)).await;

        assert_eq!(
            outcome.failure(),
            Some(&ProbeFailure::HttpStatus { status: 401 })
        );
        assert!(matches!(
            outcome.into_result(),
            Err(EvalError::AgentStatus { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let mut server = mockito::Server::new_async().await;
        let long_answer = "a".repeat(500);
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"answer": long_answer}).to_string())
            .create_async()
            .await;

        let outcome = prober_for(&server.url()).negotiate("ping").await;
        assert_eq!(outcome.variant_index(), Some(0));
        let sample = outcome.sample().unwrap();
        assert_eq!(sample.chars().count(), 100);
        assert!(sample.ends_with("..."));
    }

    /// Accepts connections and never writes a byte back.
    async fn silent_listener() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn test_unknown_host_stops_immediately() {
        let outcome = prober_for("http://no-such-agent.invalid").negotiate("ping").await;

        assert_eq!(outcome.failure(), Some(&ProbeFailure::HostNotFound));
        assert_eq!(outcome.attempts.len(), 1);
        assert!(matches!(
            outcome.error(),
            Some(EvalError::HostNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeouts_do_not_stop_the_search() {
        let url = silent_listener().await;
        let client = AgentClient::new(Endpoint::new(url)).unwrap();
        let prober = Prober::new(
            client,
            ProbeConfig::default().with_timeout(Duration::from_millis(200)),
        )
        .unwrap();

        let outcome = prober.negotiate("ping").await;

        assert_eq!(outcome.failure(), Some(&ProbeFailure::TimedOut));
        assert_eq!(outcome.attempts.len(), variants::VARIANT_COUNT);
        assert!(outcome.error().unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_stringified_sample_is_flagged() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"foo": {"bar": 1}, "baz": true}"#)
            .create_async()
            .await;

        let outcome = prober_for(&server.url()).negotiate("ping").await;

        assert!(outcome.success());
        assert!(outcome.sample_is_fallback());
        assert!(outcome.sample().unwrap().contains("bar"));
    }

    #[tokio::test]
    async fn test_invalid_custom_config_sends_nothing() {
        let config = CustomEndpointConfig::new(r#"{"q": "{{question}}"}"#).with_method("NOT A METHOD");
        let outcome = prober_for("localhost:9").probe("ping", Some(&config)).await;

        assert!(outcome.attempts.is_empty());
        assert!(matches!(
            outcome.failure(),
            Some(ProbeFailure::InvalidConfig { .. })
        ));
        assert!(outcome.message.contains("no request was sent"));
        assert!(matches!(
            outcome.into_result(),
            Err(EvalError::InvalidConfig { .. })
        ));
    }
}
