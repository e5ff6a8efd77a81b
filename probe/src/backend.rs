//! Client for the evaluation backend that stores subjects, prompts and
//! results and hosts the hallucination judge.

use crate::error::{EvalError, EvalResult};
use crate::judge::{HallucinationVerdict, QuestionReport};
use crate::types::{Prompt, QaPair};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SESSION_HEADER: &str = "X-Session-Id";

/// Credentials for one run. Never reused across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunIdentity {
    ApiKey(String),
    Session(Uuid),
}

impl RunIdentity {
    /// Uses `api_key` when one is set, otherwise opens an anonymous session.
    pub fn establish(api_key: Option<&str>) -> Self {
        match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => RunIdentity::ApiKey(key.to_string()),
            None => RunIdentity::Session(Uuid::new_v4()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, RunIdentity::Session(_))
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            RunIdentity::ApiKey(_) => None,
            RunIdentity::Session(id) => Some(*id),
        }
    }

    pub fn header(&self) -> (&'static str, String) {
        match self {
            RunIdentity::ApiKey(key) => (API_KEY_HEADER, key.clone()),
            RunIdentity::Session(id) => (SESSION_HEADER, id.to_string()),
        }
    }

    fn subjects_path(&self) -> &'static str {
        if self.is_anonymous() {
            "/api/agents/anonymous"
        } else {
            "/api/agents"
        }
    }
}

/// Creation payload for the ephemeral subject under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSpec {
    pub name: String,
    pub seed: u32,
    pub num_nodes: u32,
    pub label: String,
    pub public_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_payload: Option<Value>,
}

impl SubjectSpec {
    pub fn new(name: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: rand::thread_rng().gen_range(0..=1_000_000),
            num_nodes: 100,
            label: "eval".to_string(),
            public_url: public_url.into(),
            advanced_payload: None,
        }
    }

    pub fn with_num_nodes(mut self, num_nodes: u32) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    pub fn with_advanced_payload(mut self, payload: Value) -> Self {
        self.advanced_payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Subject {
    #[serde(alias = "_id", alias = "agentId")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-prompt result as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub prompt_id: String,
    pub status: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hallucination_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hallucination_findings: Option<Vec<Value>>,
}

impl ResultRecord {
    pub fn new(prompt_id: impl Into<String>, passed: bool, response: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            status: if passed { "passed" } else { "failed" }.to_string(),
            response: response.into(),
            expected_answer: None,
            hallucination_label: None,
            hallucination_findings: None,
        }
    }

    pub fn with_expected_answer(mut self, expected: Option<String>) -> Self {
        self.expected_answer = expected;
        self
    }

    pub fn with_verdict(mut self, verdict: Option<&HallucinationVerdict>) -> Self {
        if let Some(verdict) = verdict {
            self.hallucination_label = verdict.label.clone();
            if !verdict.findings.is_empty() {
                self.hallucination_findings = Some(verdict.findings.clone());
            }
        }
        self
    }

    /// Same record with every optional field stripped.
    pub fn minimal(&self) -> Self {
        Self::new(self.prompt_id.clone(), self.status == "passed", self.response.clone())
    }

    pub fn is_minimal(&self) -> bool {
        self.expected_answer.is_none()
            && self.hallucination_label.is_none()
            && self.hallucination_findings.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub hallucination_label: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl StoredResult {
    pub fn passed(&self) -> bool {
        self.status.eq_ignore_ascii_case("passed")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HallucinationRequest {
    pub question: String,
    pub llm_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn establish_identity(&self) -> EvalResult<RunIdentity>;

    async fn create_subject(&self, identity: &RunIdentity, spec: &SubjectSpec)
        -> EvalResult<Subject>;

    async fn attach_prompts(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        pairs: &[QaPair],
    ) -> EvalResult<Vec<Prompt>>;

    async fn list_prompts(&self, identity: &RunIdentity, subject_id: &str)
        -> EvalResult<Vec<Prompt>>;

    async fn submit_result(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        record: &ResultRecord,
    ) -> EvalResult<()>;

    async fn fetch_results(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
    ) -> EvalResult<Vec<StoredResult>>;

    /// Fails with [`EvalError::JudgeUnavailable`] when the backend has no judge.
    async fn check_hallucination(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        request: &HallucinationRequest,
    ) -> EvalResult<HallucinationVerdict>;

    /// Uploads a document and returns the Q&A pairs the backend derived from it.
    async fn extract_document(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        path: &Path,
    ) -> EvalResult<Vec<QaPair>>;

    /// Asks the backend to answer and grade `request` itself, without calling
    /// the subject's endpoint.
    async fn evaluate_question(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        request: &EvaluateRequest,
    ) -> EvalResult<QuestionReport>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_answer: Option<&'a str>,
}

#[derive(Serialize)]
struct AttachPromptsRequest<'a> {
    prompts: Vec<WirePromptInput<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePrompt {
    #[serde(alias = "_id")]
    id: Value,
    #[serde(alias = "question")]
    prompt: String,
    #[serde(default, alias = "expected_answer", alias = "answer")]
    expected_answer: Option<String>,
}

impl From<WirePrompt> for Prompt {
    fn from(wire: WirePrompt) -> Self {
        let id = match wire.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Prompt {
            id,
            question: wire.prompt,
            expected_answer: wire.expected_answer,
        }
    }
}

/// Lists come back either bare or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(
            alias = "prompts",
            alias = "results",
            alias = "qaPairs",
            alias = "qa_pairs",
            alias = "data"
        )]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) | Listing::Wrapped { items } => items,
        }
    }
}

/// Backend reached over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EvalResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(EvalError::InvalidConfig {
                message: "Backend URL cannot be empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| EvalError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, identity: &RunIdentity, path: &str) -> RequestBuilder {
        let (name, value) = identity.header();
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .header(name, value)
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> EvalResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = builder
            .send()
            .await
            .map_err(|e| EvalError::from_transport(e, &url, self.timeout))?;

        let status = response.status();
        debug!("Backend {} answered {}", path, status);

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(EvalError::Backend {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> EvalResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| EvalError::InvalidResponse {
            message: format!("{} returned unexpected JSON: {}", path, e),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn establish_identity(&self) -> EvalResult<RunIdentity> {
        let identity = RunIdentity::establish(self.api_key.as_deref());
        if identity.is_anonymous() {
            info!("No API key configured, using an anonymous session");
        }
        Ok(identity)
    }

    async fn create_subject(
        &self,
        identity: &RunIdentity,
        spec: &SubjectSpec,
    ) -> EvalResult<Subject> {
        let path = identity.subjects_path();
        let builder = self.request(Method::POST, identity, path).json(spec);
        let response = self.execute(builder, path).await?;
        Self::decode(response, path).await
    }

    async fn attach_prompts(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        pairs: &[QaPair],
    ) -> EvalResult<Vec<Prompt>> {
        let path = format!("/api/agents/{}/test-prompts", subject_id);
        let body = AttachPromptsRequest {
            prompts: pairs
                .iter()
                .map(|pair| WirePromptInput {
                    prompt: &pair.question,
                    expected_answer: pair.expected_answer.as_deref(),
                })
                .collect(),
        };
        let builder = self.request(Method::POST, identity, &path).json(&body);
        let response = self.execute(builder, &path).await?;
        let listing: Listing<WirePrompt> = Self::decode(response, &path).await?;
        Ok(listing.into_vec().into_iter().map(Prompt::from).collect())
    }

    async fn list_prompts(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
    ) -> EvalResult<Vec<Prompt>> {
        let path = format!("/api/agents/{}/test-prompts", subject_id);
        let builder = self.request(Method::GET, identity, &path);
        let response = self.execute(builder, &path).await?;
        let listing: Listing<WirePrompt> = Self::decode(response, &path).await?;
        Ok(listing.into_vec().into_iter().map(Prompt::from).collect())
    }

    async fn submit_result(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        record: &ResultRecord,
    ) -> EvalResult<()> {
        let path = format!("/api/agents/{}/test-results", subject_id);
        let builder = self.request(Method::POST, identity, &path).json(record);
        self.execute(builder, &path).await?;
        Ok(())
    }

    async fn fetch_results(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
    ) -> EvalResult<Vec<StoredResult>> {
        let path = format!("/api/agents/{}/test-results", subject_id);
        let builder = self.request(Method::GET, identity, &path);
        let response = self.execute(builder, &path).await?;
        let listing: Listing<StoredResult> = Self::decode(response, &path).await?;
        Ok(listing.into_vec())
    }

    async fn check_hallucination(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        request: &HallucinationRequest,
    ) -> EvalResult<HallucinationVerdict> {
        let path = format!("/api/agents/{}/hallucination", subject_id);
        let builder = self.request(Method::POST, identity, &path).json(request);
        match self.execute(builder, &path).await {
            Ok(response) => Self::decode(response, &path).await,
            Err(EvalError::Backend { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(EvalError::JudgeUnavailable)
            }
            Err(e) => Err(e),
        }
    }

    async fn extract_document(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        path: &Path,
    ) -> EvalResult<Vec<QaPair>> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        info!("Uploading {} ({} bytes) for question extraction", file_name, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let route = format!("/api/agents/{}/upload-pdf", subject_id);
        let builder = self.request(Method::POST, identity, &route).multipart(form);
        let response = self.execute(builder, &route).await?;
        let listing: Listing<QaPair> = Self::decode(response, &route).await?;
        Ok(listing.into_vec())
    }

    async fn evaluate_question(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        request: &EvaluateRequest,
    ) -> EvalResult<QuestionReport> {
        let path = format!("/api/agents/{}/evaluate", subject_id);
        let builder = self.request(Method::POST, identity, &path).json(request);
        let response = self.execute(builder, &path).await?;
        Self::decode(response, &path).await
    }
}
