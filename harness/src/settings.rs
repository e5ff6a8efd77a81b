//! Harness settings: TOML file, then environment, then command-line flags.

use probe::{EvaluatorConfig, ProbeConfig, ScoringPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SETTINGS_FILE: &str = "agent-eval.toml";

pub const ENV_BACKEND_URL: &str = "AGENT_EVAL_BACKEND_URL";
pub const ENV_DASHBOARD_URL: &str = "AGENT_EVAL_DASHBOARD_URL";
pub const ENV_API_KEY: &str = "AGENT_EVAL_API_KEY";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid settings: {message}")]
    Invalid { message: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub backend_url: Option<String>,
    pub dashboard_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub inter_prompt_delay_ms: Option<u64>,
    pub scoring_policy: Option<ScoringPolicy>,
    pub subject_name: Option<String>,
    pub max_prompts: Option<usize>,
}

impl Settings {
    /// Reads `path`, or `agent-eval.toml` in the working directory when no
    /// path is given. A missing default file yields empty settings.
    pub fn load(path: Option<&Path>) -> SettingsResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> SettingsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded settings from {}", path.display());
        Self::from_toml(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Environment variables win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        for (name, slot) in [
            (ENV_BACKEND_URL, &mut self.backend_url),
            (ENV_DASHBOARD_URL, &mut self.dashboard_url),
            (ENV_API_KEY, &mut self.api_key),
        ] {
            if let Ok(value) = std::env::var(name) {
                if !value.trim().is_empty() {
                    *slot = Some(value.trim().to_string());
                }
            }
        }
        self
    }

    pub fn evaluator_config(&self) -> SettingsResult<EvaluatorConfig> {
        let mut config = EvaluatorConfig::default();

        if let Some(url) = &self.backend_url {
            config = config.with_backend_url(url.trim_end_matches('/'));
        }
        if let Some(url) = &self.dashboard_url {
            config = config.with_dashboard_url(url.as_str());
        }
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.as_str());
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.inter_prompt_delay_ms {
            config = config.with_inter_prompt_delay(Duration::from_millis(ms));
        }
        if let Some(policy) = self.scoring_policy {
            config = config.with_scoring_policy(policy);
        }
        if let Some(name) = &self.subject_name {
            config = config.with_subject_name(name.as_str());
        }
        if let Some(max) = self.max_prompts {
            config = config.with_max_prompts(max);
        }

        config
            .validate()
            .map_err(|message| SettingsError::Invalid { message })?;
        Ok(config)
    }

    pub fn probe_config(&self) -> SettingsResult<ProbeConfig> {
        let mut config = ProbeConfig::default();
        if let Some(secs) = self.probe_timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
            .validate()
            .map_err(|message| SettingsError::Invalid { message })?;
        Ok(config)
    }
}
