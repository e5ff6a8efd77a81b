use async_trait::async_trait;
use probe::QaPair;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No files match {pattern}")]
    NotFound { pattern: String },

    #[error("Invalid file pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Anything that can produce question/answer pairs for a run.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> SourceResult<Vec<QaPair>>;
}

/// Q&A pairs from JSON arrays or JSON Lines files.
pub struct QaFileSource {
    pattern: String,
    limit: Option<usize>,
}

impl QaFileSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn paths(&self) -> SourceResult<Vec<PathBuf>> {
        let literal = Path::new(&self.pattern);
        if literal.is_file() {
            return Ok(vec![literal.to_path_buf()]);
        }

        let entries = glob::glob(&self.pattern).map_err(|e| SourceError::InvalidPattern {
            pattern: self.pattern.clone(),
            message: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::NotFound {
                pattern: self.pattern.clone(),
            });
        }
        Ok(paths)
    }
}

#[async_trait]
impl KnowledgeSource for QaFileSource {
    fn name(&self) -> &str {
        &self.pattern
    }

    async fn load(&self) -> SourceResult<Vec<QaPair>> {
        let mut pairs = Vec::new();

        for path in self.paths()? {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| SourceError::Io {
                    path: path.clone(),
                    source,
                })?;
            let parsed = parse_pairs(&text).map_err(|message| SourceError::Parse {
                path: path.clone(),
                message,
            })?;
            debug!("Read {} pairs from {}", parsed.len(), path.display());
            pairs.extend(parsed);

            if matches!(self.limit, Some(limit) if pairs.len() >= limit) {
                break;
            }
        }

        if let Some(limit) = self.limit {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }
}

/// Questions given directly on the command line.
pub struct InlineSource {
    questions: Vec<String>,
}

impl InlineSource {
    pub fn new(questions: Vec<String>) -> Self {
        Self { questions }
    }
}

#[async_trait]
impl KnowledgeSource for InlineSource {
    fn name(&self) -> &str {
        "inline"
    }

    async fn load(&self) -> SourceResult<Vec<QaPair>> {
        Ok(self
            .questions
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(QaPair::new)
            .collect())
    }
}

/// Parses a JSON array, an object holding one, or JSON Lines.
pub fn parse_pairs(text: &str) -> Result<Vec<QaPair>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            let list = match value {
                Value::Object(mut map) => ["pairs", "questions", "data"]
                    .iter()
                    .find_map(|key| map.remove(*key))
                    .unwrap_or(Value::Array(vec![Value::Object(map)])),
                other => other,
            };
            return serde_json::from_value(list).map_err(|e| e.to_string());
        }
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<QaPair>(line).map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}

/// Loads every source in order, then applies `limit` to the combined list.
pub async fn collect(
    sources: &[Box<dyn KnowledgeSource>],
    limit: Option<usize>,
) -> SourceResult<Vec<QaPair>> {
    let mut pairs = Vec::new();
    for source in sources {
        let loaded = source.load().await?;
        info!("Loaded {} questions from {}", loaded.len(), source.name());
        pairs.extend(loaded);
    }

    if let Some(limit) = limit {
        pairs.truncate(limit);
    }
    Ok(pairs)
}
