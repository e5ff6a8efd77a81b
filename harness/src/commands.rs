//! What each subcommand does, separated from argument parsing and printing.

use crate::cli::{BackendArgs, RunArgs};
use crate::settings::{Settings, SettingsError};
use crate::sources::{self, InlineSource, KnowledgeSource, QaFileSource, SourceError};
use probe::{
    AgentClient, Backend, CustomEndpointConfig, Endpoint, EvalError, EvaluateRequest, Evaluator,
    HttpBackend, NegotiatedProtocol, ProbeConfig, ProbeOutcome, Prober, Progress, PromptSource,
    QuestionReport, RunIdentity, RunReport, RunSummary, ScoringPolicy, StoredResult,
    DEFAULT_QUESTIONS,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub type CliResult<T> = Result<T, CliError>;

/// How a `run` ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The connection test failed, nothing was evaluated.
    ProbeFailed(ProbeOutcome),
    /// Setup failed before the first prompt.
    Aborted { error: EvalError, summary: RunSummary },
    Completed {
        probe: Option<ProbeOutcome>,
        report: RunReport,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Applies backend flags on top of file and environment settings.
pub fn apply_backend_args(mut settings: Settings, args: &BackendArgs) -> Settings {
    if let Some(url) = &args.backend_url {
        settings.backend_url = Some(url.clone());
    }
    if let Some(key) = &args.api_key {
        settings.api_key = Some(key.clone());
    }
    settings
}

pub async fn probe_endpoint(
    address: &str,
    question: &str,
    custom: Option<&CustomEndpointConfig>,
    config: ProbeConfig,
) -> CliResult<ProbeOutcome> {
    let client = AgentClient::new(Endpoint::new(address))?;
    let prober = Prober::new(client, config)?;
    Ok(prober.probe(question, custom).await)
}

/// Builds the prompt source from `--document`, `--qa-file` and `--question`.
pub async fn load_prompts(args: &RunArgs) -> CliResult<PromptSource> {
    if let Some(path) = &args.document {
        return Ok(PromptSource::Document(path.clone()));
    }

    let mut knowledge: Vec<Box<dyn KnowledgeSource>> = Vec::new();
    for pattern in &args.qa_files {
        let mut source = QaFileSource::new(pattern.as_str());
        if let Some(limit) = args.limit {
            source = source.with_limit(limit);
        }
        knowledge.push(Box::new(source));
    }
    if !args.questions.is_empty() {
        knowledge.push(Box::new(InlineSource::new(args.questions.clone())));
    }

    let pairs = sources::collect(&knowledge, args.limit).await?;
    Ok(PromptSource::Pairs(pairs))
}

fn probe_question(source: &PromptSource) -> String {
    match source {
        PromptSource::Pairs(pairs) if !pairs.is_empty() => pairs[0].question.clone(),
        _ => DEFAULT_QUESTIONS[0].to_string(),
    }
}

pub async fn run_evaluation<F>(
    args: &RunArgs,
    settings: &Settings,
    on_progress: F,
) -> CliResult<RunOutcome>
where
    F: Fn(Progress) + Send + Sync + 'static,
{
    let started = Instant::now();

    let mut config = settings.evaluator_config()?;
    if args.strict {
        config = config.with_scoring_policy(ScoringPolicy::Strict);
    }
    if let Some(limit) = args.limit {
        config = config.with_max_prompts(limit);
    }
    let probe_config = settings.probe_config()?;

    let custom = args.custom.to_config()?;
    let source = load_prompts(args).await?;

    let endpoint = Endpoint::new(args.endpoint.as_str());
    info!("Evaluating {}", endpoint);
    let client = AgentClient::new(endpoint)?;

    let (protocol, probe) = if args.skip_probe {
        (custom.map(NegotiatedProtocol::custom), None)
    } else {
        let prober = Prober::new(client.clone(), probe_config.clone())?;
        let outcome = prober
            .probe(&probe_question(&source), custom.as_ref())
            .await;
        match outcome.protocol().cloned() {
            Some(protocol) => (Some(protocol), Some(outcome)),
            None => return Ok(RunOutcome::ProbeFailed(outcome)),
        }
    };

    let backend = HttpBackend::new(config.backend_url.as_str(), config.request_timeout)?
        .with_api_key(config.api_key.clone());
    let evaluator = Evaluator::new(config, client, Arc::new(backend))?
        .with_probe_config(probe_config)
        .with_progress_callback(on_progress);

    match evaluator.run(source, protocol).await {
        Ok(report) => Ok(RunOutcome::Completed { probe, report }),
        Err(error) => Ok(RunOutcome::Aborted {
            error,
            summary: RunSummary::aborted(started.elapsed()),
        }),
    }
}

/// Backend client plus the identity a subject lookup should use.
async fn backend_for_subject(
    session: Option<Uuid>,
    settings: &Settings,
) -> CliResult<(HttpBackend, RunIdentity)> {
    let config = settings.evaluator_config()?;
    let backend = HttpBackend::new(config.backend_url.as_str(), config.request_timeout)?
        .with_api_key(config.api_key.clone());

    let identity = match session {
        Some(id) => RunIdentity::Session(id),
        None => backend.establish_identity().await?,
    };
    Ok((backend, identity))
}

pub async fn fetch_stored(
    subject_id: &str,
    session: Option<Uuid>,
    settings: &Settings,
) -> CliResult<Vec<StoredResult>> {
    let (backend, identity) = backend_for_subject(session, settings).await?;
    Ok(backend.fetch_results(&identity, subject_id).await?)
}

pub async fn evaluate_question(
    subject_id: &str,
    question: &str,
    expected: Option<&str>,
    session: Option<Uuid>,
    settings: &Settings,
) -> CliResult<QuestionReport> {
    let (backend, identity) = backend_for_subject(session, settings).await?;
    let request = EvaluateRequest {
        question: question.to_string(),
        expected_answer: expected.map(str::to_string),
    };
    Ok(backend
        .evaluate_question(&identity, subject_id, &request)
        .await?)
}
