pub mod agent;
pub mod backend;
pub mod config;
pub mod custom;
pub mod endpoint;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod judge;
pub mod persist;
pub mod prober;
pub mod types;
pub mod variants;

pub use agent::{AgentClient, AgentReply, AgentRequest, NegotiatedProtocol, RequestBody};
pub use backend::{
    Backend, EvaluateRequest, HallucinationRequest, HttpBackend, ResultRecord, RunIdentity,
    StoredResult, Subject, SubjectSpec,
};
pub use config::{EvaluatorConfig, ProbeConfig};
pub use custom::{parse_headers, CustomEndpointConfig};
pub use endpoint::{normalize, Endpoint};
pub use error::{ErrorCategory, EvalError, EvalResult};
pub use evaluator::{Evaluator, ProgressCallback};
pub use extract::{Extraction, ExtractionSource};
pub use judge::{HallucinationVerdict, Judgement, QuestionReport, ScoringPolicy, VerdictStatus};
pub use persist::persist_result;
pub use prober::{ProbeFailure, ProbeOutcome, ProbeVerdict, Prober};
pub use types::{
    EvaluationResult, PersistOutcome, Progress, Prompt, PromptSource, QaPair, RunReport,
    RunSummary, DEFAULT_QUESTIONS,
};
pub use variants::PayloadVariant;

pub mod prelude {
    pub use crate::agent::*;
    pub use crate::backend::*;
    pub use crate::config::*;
    pub use crate::custom::*;
    pub use crate::endpoint::*;
    pub use crate::error::*;
    pub use crate::evaluator::*;
    pub use crate::judge::*;
    pub use crate::prober::*;
    pub use crate::types::*;
}
