use crate::extract::ExtractionSource;
use crate::judge::{HallucinationVerdict, Judgement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Questions asked when no knowledge source produced any.
pub const DEFAULT_QUESTIONS: &[&str] = &[
    "What can you help me with?",
    "Can you describe your main capabilities?",
    "What information do you have access to?",
    "How do you handle questions you cannot answer?",
    "Can you give me an example of a task you can perform?",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    #[serde(
        default,
        alias = "answer",
        alias = "expectedAnswer",
        alias = "expected_answer",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_answer: Option<String>,
}

impl QaPair {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            expected_answer: None,
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.expected_answer = Some(answer.into());
        self
    }

    pub fn defaults() -> Vec<QaPair> {
        DEFAULT_QUESTIONS.iter().map(|q| QaPair::new(*q)).collect()
    }
}

/// Where a run's prompts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Pairs(Vec<QaPair>),
    /// A document the backend turns into Q&A pairs.
    Document(PathBuf),
}

impl Default for PromptSource {
    fn default() -> Self {
        PromptSource::Pairs(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub question: String,
    pub expected_answer: Option<String>,
}

impl Prompt {
    pub fn new(id: impl Into<String>, pair: QaPair) -> Self {
        Self {
            id: id.into(),
            question: pair.question,
            expected_answer: pair.expected_answer,
        }
    }
}

/// Outcome of evaluating one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub prompt_id: String,
    pub question: String,
    pub expected_answer: Option<String>,
    pub success: bool,
    /// Set only when the agent call returned something.
    pub response: Option<String>,
    pub extraction_source: Option<ExtractionSource>,
    pub judgement: Judgement,
    pub error: Option<String>,
    pub persisted: PersistOutcome,
    pub latency: Duration,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn verdict(&self) -> Option<&HallucinationVerdict> {
        self.judgement.verdict()
    }
}

/// How far the two-tier result write got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum PersistOutcome {
    Full,
    Minimal,
    Dropped { reason: String },
}

impl PersistOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, PersistOutcome::Dropped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration: Duration,
    pub results_url: Option<String>,
}

impl RunSummary {
    pub fn from_results(
        results: &[EvaluationResult],
        duration: Duration,
        results_url: Option<String>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            total_tests: results.len(),
            passed,
            failed: results.len() - passed,
            duration,
            results_url,
        }
    }

    /// Summary for a run that could not start.
    pub fn aborted(duration: Duration) -> Self {
        Self {
            total_tests: 0,
            passed: 0,
            failed: 0,
            duration,
            results_url: None,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed as f64 / self.total_tests as f64
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} passed, {} failed in {:.1}s",
            self.passed,
            self.total_tests,
            self.failed,
            self.duration.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub subject_id: String,
    /// Anonymous session the subject was created under; needed to read it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Uuid>,
    pub summary: RunSummary,
    pub results: Vec<EvaluationResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// 0 to 100, never decreasing within a run.
    pub percent: u8,
    pub stage: String,
}
