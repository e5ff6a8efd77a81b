//! Hallucination verdicts and the policy that turns them into pass/fail.
//!
//! Scoring itself happens on the remote backend; this module only models what
//! comes back and decides how each outcome counts toward the run summary.
//!
//! # Examples
//!
//! ```rust
//! use probe::judge::{Judgement, ScoringPolicy};
//!
//! // A backend without the scoring endpoint
//! let judgement = Judgement::Unavailable;
//! assert!(ScoringPolicy::Lenient.decide(&judgement));
//! assert!(!ScoringPolicy::Strict.decide(&judgement));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status reported by the remote judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Passed,
    Failed,
    /// Also used for any status string the backend introduces later
    #[serde(other)]
    Ambiguous,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Passed => write!(f, "passed"),
            VerdictStatus::Failed => write!(f, "failed"),
            VerdictStatus::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

/// Verdict returned by the hallucination check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationVerdict {
    pub status: VerdictStatus,
    /// Free-text explanation from the judge
    #[serde(default)]
    pub summary: String,
    /// Facts the judge extracted from the answer
    #[serde(default)]
    pub facts: Vec<Value>,
    /// Short classification label
    #[serde(default)]
    pub label: Option<String>,
    /// Individual findings backing the verdict
    #[serde(default)]
    pub findings: Vec<Value>,
}

impl HallucinationVerdict {
    pub fn new(status: VerdictStatus) -> Self {
        Self {
            status,
            summary: String::new(),
            facts: Vec::new(),
            label: None,
            findings: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Backend report for a single question answered from its own knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionReport {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub facts: Vec<Value>,
}

/// What happened when a prompt's answer was sent for scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Judgement {
    /// The judge answered
    Verdict { verdict: HallucinationVerdict },
    /// The backend has no scoring endpoint (HTTP 404)
    Unavailable,
    /// Scoring failed for any other reason
    Error { message: String },
    /// The agent produced no answer, so nothing was scored
    NotJudged,
}

impl Judgement {
    pub fn verdict(&self) -> Option<&HallucinationVerdict> {
        match self {
            Judgement::Verdict { verdict } => Some(verdict),
            _ => None,
        }
    }

    /// True when no verdict could be obtained for a real answer.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Judgement::Unavailable | Judgement::Error { .. })
    }
}

/// How prompts without a usable verdict are counted
///
/// `Lenient` keeps older backends working: a missing or broken judge counts
/// as a pass, since the agent did answer. `Strict` counts those prompts as
/// failures. Only an explicit `passed` verdict passes under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringPolicy {
    #[default]
    Lenient,
    Strict,
}

impl ScoringPolicy {
    pub fn decide(&self, judgement: &Judgement) -> bool {
        match judgement {
            Judgement::Verdict { verdict } => verdict.status == VerdictStatus::Passed,
            Judgement::Unavailable | Judgement::Error { .. } => *self == ScoringPolicy::Lenient,
            Judgement::NotJudged => false,
        }
    }
}

impl std::str::FromStr for ScoringPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(ScoringPolicy::Lenient),
            "strict" => Ok(ScoringPolicy::Strict),
            other => Err(format!("Unknown scoring policy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verdict(status: VerdictStatus) -> Judgement {
        Judgement::Verdict {
            verdict: HallucinationVerdict::new(status),
        }
    }

    #[test]
    fn test_only_passed_verdict_passes() {
        for policy in [ScoringPolicy::Lenient, ScoringPolicy::Strict] {
            assert!(policy.decide(&verdict(VerdictStatus::Passed)));
            assert!(!policy.decide(&verdict(VerdictStatus::Failed)));
            assert!(!policy.decide(&verdict(VerdictStatus::Ambiguous)));
            assert!(!policy.decide(&Judgement::NotJudged));
        }
    }

    #[test]
    fn test_policy_controls_inconclusive() {
        let broken = Judgement::Error {
            message: "HTTP 500".to_string(),
        };
        assert!(ScoringPolicy::Lenient.decide(&Judgement::Unavailable));
        assert!(ScoringPolicy::Lenient.decide(&broken));
        assert!(!ScoringPolicy::Strict.decide(&Judgement::Unavailable));
        assert!(!ScoringPolicy::Strict.decide(&broken));
        assert!(broken.is_inconclusive());
    }

    #[test]
    fn test_verdict_deserialization() {
        let verdict: HallucinationVerdict = serde_json::from_value(json!({
            "status": "failed",
            "summary": "Claims a 90 day window",
            "facts": ["refunds within 30 days"],
            "label": "hallucination",
            "findings": [{"claim": "90 days", "supported": false}]
        }))
        .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Failed);
        assert_eq!(verdict.label.as_deref(), Some("hallucination"));
        assert_eq!(verdict.findings.len(), 1);

        let minimal: HallucinationVerdict =
            serde_json::from_value(json!({"status": "passed"})).unwrap();
        assert_eq!(minimal.status, VerdictStatus::Passed);
        assert!(minimal.facts.is_empty());
    }

    #[test]
    fn test_unknown_status_is_ambiguous() {
        let verdict: HallucinationVerdict =
            serde_json::from_value(json!({"status": "partially_supported"})).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Ambiguous);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("STRICT".parse::<ScoringPolicy>(), Ok(ScoringPolicy::Strict));
        assert_eq!("lenient".parse::<ScoringPolicy>(), Ok(ScoringPolicy::Lenient));
        assert!("loose".parse::<ScoringPolicy>().is_err());
    }
}
