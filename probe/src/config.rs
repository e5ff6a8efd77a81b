use crate::judge::ScoringPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub sample_length: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            sample_length: 100,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sample_length(mut self, sample_length: usize) -> Self {
        self.sample_length = sample_length;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("Probe timeout must be greater than 0".to_string());
        }

        if self.sample_length == 0 {
            return Err("Sample length must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub backend_url: String,
    pub dashboard_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub inter_prompt_delay: Duration,
    pub scoring_policy: ScoringPolicy,
    pub subject_name: String,
    pub subject_nodes: u32,
    pub max_prompts: Option<usize>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3001".to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            inter_prompt_delay: Duration::from_millis(500),
            scoring_policy: ScoringPolicy::Lenient,
            subject_name: "agent-eval".to_string(),
            subject_nodes: 100,
            max_prompts: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend_url(mut self, backend_url: impl Into<String>) -> Self {
        self.backend_url = backend_url.into();
        self
    }

    pub fn with_dashboard_url(mut self, dashboard_url: impl Into<String>) -> Self {
        self.dashboard_url = dashboard_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_inter_prompt_delay(mut self, delay: Duration) -> Self {
        self.inter_prompt_delay = delay;
        self
    }

    pub fn with_scoring_policy(mut self, policy: ScoringPolicy) -> Self {
        self.scoring_policy = policy;
        self
    }

    pub fn with_subject_name(mut self, name: impl Into<String>) -> Self {
        self.subject_name = name.into();
        self
    }

    pub fn with_max_prompts(mut self, max_prompts: usize) -> Self {
        self.max_prompts = Some(max_prompts);
        self
    }

    /// Link to the human-readable results page for a subject.
    pub fn results_url(&self, subject_id: &str) -> String {
        format!(
            "{}/eval/{}",
            self.dashboard_url.trim_end_matches('/'),
            subject_id
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("Backend URL", &self.backend_url),
            ("Dashboard URL", &self.dashboard_url),
        ] {
            if url.is_empty() {
                return Err(format!("{} cannot be empty", name));
            }

            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{} must start with http:// or https://", name));
            }
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than 0".to_string());
        }

        if self.subject_nodes == 0 {
            return Err("Subject node count must be greater than 0".to_string());
        }

        if let Some(max_prompts) = self.max_prompts {
            if max_prompts == 0 {
                return Err("Max prompts must be greater than 0".to_string());
            }
        }

        if matches!(&self.api_key, Some(key) if key.trim().is_empty()) {
            return Err("API key cannot be blank".to_string());
        }

        Ok(())
    }
}
