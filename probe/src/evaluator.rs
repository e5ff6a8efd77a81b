//! Sequential evaluation of one agent endpoint.
//!
//! A run establishes an identity, creates an ephemeral subject on the
//! backend, attaches the prompts and then evaluates them one at a time.
//! Failures before the prompt loop abort the run. Failures inside the loop
//! are recorded on that prompt's result and the loop carries on.

use crate::agent::{AgentClient, NegotiatedProtocol};
use crate::backend::{Backend, HallucinationRequest, ResultRecord, RunIdentity, SubjectSpec};
use crate::config::{EvaluatorConfig, ProbeConfig};
use crate::error::{EvalError, EvalResult};
use crate::judge::Judgement;
use crate::persist::persist_result;
use crate::prober::{ProbeOutcome, Prober};
use crate::types::{
    EvaluationResult, Progress, Prompt, PromptSource, QaPair, RunReport, RunSummary,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub type ProgressCallback = Box<dyn Fn(Progress) + Send + Sync>;

const LOOP_START: u8 = 30;
const LOOP_END: u8 = 95;

pub struct Evaluator {
    config: EvaluatorConfig,
    probe_config: ProbeConfig,
    client: AgentClient,
    backend: Arc<dyn Backend>,
    progress: Option<ProgressCallback>,
}

/// Request format for the prompt loop, negotiated at most once per run.
enum ProtocolState {
    Pending,
    Ready(NegotiatedProtocol),
    Failed(ProbeOutcome),
}

impl Evaluator {
    pub fn new(
        config: EvaluatorConfig,
        client: AgentClient,
        backend: Arc<dyn Backend>,
    ) -> EvalResult<Self> {
        config
            .validate()
            .map_err(|message| EvalError::InvalidConfig { message })?;

        Ok(Self {
            config,
            probe_config: ProbeConfig::default(),
            client,
            backend,
            progress: None,
        })
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Settings for negotiating on the first prompt when `run` gets no protocol.
    pub fn with_probe_config(mut self, probe_config: ProbeConfig) -> Self {
        self.probe_config = probe_config;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Runs every prompt from `source` against the agent.
    ///
    /// Without a `protocol` the request format is negotiated on the first
    /// prompt and reused for the rest of the run.
    pub async fn run(
        &self,
        source: PromptSource,
        protocol: Option<NegotiatedProtocol>,
    ) -> EvalResult<RunReport> {
        let started = Instant::now();
        self.report(0, "Starting evaluation");

        let identity = self
            .backend
            .establish_identity()
            .await
            .map_err(|e| setup_error("Could not establish a run identity", e))?;
        self.report(10, "Identity established");

        let mut spec = SubjectSpec::new(&self.config.subject_name, self.client.endpoint().url())
            .with_num_nodes(self.config.subject_nodes);
        if let Some(protocol) = &protocol {
            spec = spec.with_advanced_payload(protocol.advanced_payload());
        }
        let subject = self
            .backend
            .create_subject(&identity, &spec)
            .await
            .map_err(|e| setup_error("Could not create test subject", e))?;
        info!("Created test subject {}", subject.id);
        self.report(20, "Test subject created");

        let pairs = self.materialize(&identity, &subject.id, source).await?;
        let prompts = self.attach(&identity, &subject.id, pairs).await;
        self.report(LOOP_START, "Prompts ready");

        let total = prompts.len();
        let mut protocol = match protocol {
            Some(protocol) => ProtocolState::Ready(protocol),
            None => ProtocolState::Pending,
        };
        let mut results = Vec::with_capacity(total);

        for (index, prompt) in prompts.iter().enumerate() {
            if index > 0 && !self.config.inter_prompt_delay.is_zero() {
                tokio::time::sleep(self.config.inter_prompt_delay).await;
            }

            let result = self
                .evaluate_prompt(&identity, &subject.id, prompt, &mut protocol)
                .await;
            info!(
                "Prompt {}/{}: {}",
                index + 1,
                total,
                if result.success { "passed" } else { "failed" }
            );
            results.push(result);

            let span = (LOOP_END - LOOP_START) as usize;
            let percent = LOOP_START as usize + span * (index + 1) / total;
            self.report(percent as u8, &format!("Evaluated {}/{} prompts", index + 1, total));
        }

        let summary = RunSummary::from_results(
            &results,
            started.elapsed(),
            Some(self.config.results_url(&subject.id)),
        );
        info!("Evaluation finished: {}", summary);
        self.report(100, "Evaluation complete");

        Ok(RunReport {
            subject_id: subject.id,
            session: identity.session_id(),
            summary,
            results,
        })
    }

    async fn materialize(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        source: PromptSource,
    ) -> EvalResult<Vec<QaPair>> {
        let mut pairs = match source {
            PromptSource::Pairs(pairs) => pairs,
            PromptSource::Document(path) => self
                .backend
                .extract_document(identity, subject_id, &path)
                .await
                .map_err(|e| {
                    setup_error(&format!("Could not extract questions from {}", path.display()), e)
                })?,
        };

        pairs.retain(|pair| !pair.question.trim().is_empty());
        if pairs.is_empty() {
            info!("No questions supplied, using the default question set");
            pairs = QaPair::defaults();
        }

        if let Some(max) = self.config.max_prompts {
            pairs.truncate(max);
        }

        Ok(pairs)
    }

    async fn attach(&self, identity: &RunIdentity, subject_id: &str, pairs: Vec<QaPair>) -> Vec<Prompt> {
        match self.backend.attach_prompts(identity, subject_id, &pairs).await {
            Ok(prompts) if prompts.len() == pairs.len() => prompts,
            Ok(prompts) => {
                warn!(
                    "Backend returned {} prompts for {} questions, using local ids",
                    prompts.len(),
                    pairs.len()
                );
                local_prompts(pairs)
            }
            Err(e) => {
                warn!("Could not attach prompts ({}), using local ids", e);
                local_prompts(pairs)
            }
        }
    }

    async fn evaluate_prompt(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        prompt: &Prompt,
        protocol: &mut ProtocolState,
    ) -> EvaluationResult {
        let started = Instant::now();

        let answer = match self.resolve_protocol(&prompt.question, protocol).await {
            Ok(active) => self
                .client
                .ask(active, &prompt.question, self.config.request_timeout)
                .await
                .map(|reply| (reply.answer().to_string(), reply.extraction.source)),
            Err(e) => Err(e),
        };

        let (response, extraction_source, judgement, error) = match answer {
            Ok((text, source)) => {
                let judgement = self.judge(identity, subject_id, prompt, &text).await;
                (Some(text), Some(source), judgement, None)
            }
            Err(e) => {
                warn!("Agent call for prompt {} failed: {}", prompt.id, e);
                (None, None, Judgement::NotJudged, Some(e.to_string()))
            }
        };

        let success = self.config.scoring_policy.decide(&judgement);

        let stored_response = response
            .clone()
            .or_else(|| error.as_ref().map(|e| format!("Error: {}", e)))
            .unwrap_or_default();
        let record = ResultRecord::new(prompt.id.clone(), success, stored_response)
            .with_expected_answer(prompt.expected_answer.clone())
            .with_verdict(judgement.verdict());
        let persisted = persist_result(self.backend.as_ref(), identity, subject_id, &record).await;

        EvaluationResult {
            prompt_id: prompt.id.clone(),
            question: prompt.question.clone(),
            expected_answer: prompt.expected_answer.clone(),
            success,
            response,
            extraction_source,
            judgement,
            error,
            persisted,
            latency: started.elapsed(),
            evaluated_at: Utc::now(),
        }
    }

    /// A failed negotiation is kept, so later prompts fail with the same error
    /// instead of trying every variant again.
    async fn resolve_protocol<'a>(
        &self,
        question: &str,
        protocol: &'a mut ProtocolState,
    ) -> EvalResult<&'a NegotiatedProtocol> {
        if matches!(protocol, ProtocolState::Pending) {
            let prober = Prober::new(self.client.clone(), self.probe_config.clone())?;
            let outcome = prober.negotiate(question).await;
            *protocol = match outcome.protocol().cloned() {
                Some(negotiated) => {
                    info!("Negotiated {}", negotiated);
                    ProtocolState::Ready(negotiated)
                }
                None => ProtocolState::Failed(outcome),
            };
        }

        let protocol: &'a ProtocolState = protocol;
        match protocol {
            ProtocolState::Ready(negotiated) => Ok(negotiated),
            ProtocolState::Failed(outcome) => {
                debug!("Negotiation already failed for this run");
                Err(outcome.error().unwrap_or_else(|| EvalError::IncompatibleProtocol {
                    tried: outcome.attempts.len(),
                }))
            }
            ProtocolState::Pending => Err(EvalError::InvalidConfig {
                message: "No request protocol available".to_string(),
            }),
        }
    }

    async fn judge(
        &self,
        identity: &RunIdentity,
        subject_id: &str,
        prompt: &Prompt,
        answer: &str,
    ) -> Judgement {
        let request = HallucinationRequest {
            question: prompt.question.clone(),
            llm_response: answer.to_string(),
            expected_answer: prompt.expected_answer.clone(),
        };

        match self
            .backend
            .check_hallucination(identity, subject_id, &request)
            .await
        {
            Ok(verdict) => {
                debug!("Judge verdict for prompt {}: {}", prompt.id, verdict.status);
                Judgement::Verdict { verdict }
            }
            Err(EvalError::JudgeUnavailable) => {
                debug!("Judge unavailable for prompt {}", prompt.id);
                Judgement::Unavailable
            }
            Err(e) => {
                warn!("Judge failed for prompt {}: {}", prompt.id, e);
                Judgement::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    fn report(&self, percent: u8, stage: &str) {
        debug!("Progress {}%: {}", percent, stage);
        if let Some(callback) = &self.progress {
            callback(Progress {
                percent,
                stage: stage.to_string(),
            });
        }
    }
}

fn setup_error(context: &str, err: EvalError) -> EvalError {
    EvalError::Setup {
        message: format!("{}: {}", context, err),
    }
}

fn local_prompts(pairs: Vec<QaPair>) -> Vec<Prompt> {
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, pair)| Prompt::new(format!("local-{}", i + 1), pair))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EvaluateRequest, StoredResult, Subject};
    use crate::endpoint::Endpoint;
    use crate::judge::{HallucinationVerdict, QuestionReport, ScoringPolicy, VerdictStatus};
    use crate::types::PersistOutcome;
    use async_trait::async_trait;
    use mockito::Matcher;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    type JudgeFn = Box<dyn Fn(&HallucinationRequest) -> EvalResult<HallucinationVerdict> + Send + Sync>;

    struct FakeBackend {
        judge: JudgeFn,
        fail_subject: bool,
        fail_attach: bool,
        document: Vec<QaPair>,
        attached: Mutex<Vec<QaPair>>,
        submitted: Mutex<Vec<ResultRecord>>,
    }

    impl FakeBackend {
        fn passing() -> Self {
            Self::with_judge(|_| Ok(HallucinationVerdict::new(VerdictStatus::Passed)))
        }

        fn with_judge<F>(judge: F) -> Self
        where
            F: Fn(&HallucinationRequest) -> EvalResult<HallucinationVerdict> + Send + Sync + 'static,
        {
            Self {
                judge: Box::new(judge),
                fail_subject: false,
                fail_attach: false,
                document: Vec::new(),
                attached: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn submitted(&self) -> Vec<ResultRecord> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn establish_identity(&self) -> EvalResult<RunIdentity> {
            Ok(RunIdentity::establish(None))
        }

        async fn create_subject(&self, _: &RunIdentity, spec: &SubjectSpec) -> EvalResult<Subject> {
            if self.fail_subject {
                return Err(EvalError::Backend {
                    path: "/api/agents/anonymous".to_string(),
                    status: 503,
                    body: "maintenance".to_string(),
                });
            }
            Ok(Subject {
                id: "subj-1".to_string(),
                name: Some(spec.name.clone()),
            })
        }

        async fn attach_prompts(
            &self,
            _: &RunIdentity,
            _: &str,
            pairs: &[QaPair],
        ) -> EvalResult<Vec<Prompt>> {
            if self.fail_attach {
                return Err(EvalError::Backend {
                    path: "/test-prompts".to_string(),
                    status: 500,
                    body: String::new(),
                });
            }
            self.attached.lock().unwrap().extend_from_slice(pairs);
            Ok(pairs
                .iter()
                .enumerate()
                .map(|(i, pair)| Prompt::new(format!("p{}", i + 1), pair.clone()))
                .collect())
        }

        async fn list_prompts(&self, _: &RunIdentity, _: &str) -> EvalResult<Vec<Prompt>> {
            Ok(Vec::new())
        }

        async fn submit_result(
            &self,
            _: &RunIdentity,
            _: &str,
            record: &ResultRecord,
        ) -> EvalResult<()> {
            self.submitted.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn fetch_results(&self, _: &RunIdentity, _: &str) -> EvalResult<Vec<StoredResult>> {
            Ok(Vec::new())
        }

        async fn check_hallucination(
            &self,
            _: &RunIdentity,
            _: &str,
            request: &HallucinationRequest,
        ) -> EvalResult<HallucinationVerdict> {
            (self.judge)(request)
        }

        async fn extract_document(
            &self,
            _: &RunIdentity,
            _: &str,
            _: &Path,
        ) -> EvalResult<Vec<QaPair>> {
            Ok(self.document.clone())
        }

        async fn evaluate_question(
            &self,
            _: &RunIdentity,
            _: &str,
            _: &EvaluateRequest,
        ) -> EvalResult<QuestionReport> {
            Err(EvalError::JudgeUnavailable)
        }
    }

    fn config() -> EvaluatorConfig {
        EvaluatorConfig::new().with_inter_prompt_delay(Duration::ZERO)
    }

    fn evaluator(url: &str, backend: Arc<FakeBackend>, config: EvaluatorConfig) -> Evaluator {
        let client = AgentClient::new(Endpoint::new(url)).unwrap();
        Evaluator::new(config, client, backend).unwrap()
    }

    fn pairs(questions: &[&str]) -> PromptSource {
        PromptSource::Pairs(questions.iter().map(|q| QaPair::new(*q)).collect())
    }

    async fn echo_agent(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer": "received"}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_all_prompts_pass() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator(&server.url(), backend.clone(), config());

        let report = evaluator
            .run(pairs(&["a?", "b?", "c?", "d?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();

        assert_eq!(report.summary.total_tests, 4);
        assert_eq!(report.summary.passed, 4);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(
            report.summary.results_url.as_deref(),
            Some("http://localhost:3000/eval/subj-1")
        );
        assert!(report.results.iter().all(|r| r.response.as_deref() == Some("received")));
        assert!(report.results.iter().all(|r| r.persisted == PersistOutcome::Full));
        assert_eq!(backend.submitted().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_verdicts_are_counted() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let backend = Arc::new(FakeBackend::with_judge(|request| {
            let status = if request.question.starts_with("bad") {
                VerdictStatus::Failed
            } else {
                VerdictStatus::Passed
            };
            Ok(HallucinationVerdict::new(status).with_label("checked"))
        }));
        let evaluator = evaluator(&server.url(), backend.clone(), config());

        let report = evaluator
            .run(
                pairs(&["good 1", "bad 1", "good 2", "bad 2", "good 3"]),
                Some(NegotiatedProtocol::variant(1).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.total_tests, 5);
        assert_eq!(report.summary.passed, 3);
        assert_eq!(report.summary.failed, 2);
        let statuses: Vec<String> = backend.submitted().into_iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["passed", "failed", "passed", "failed", "passed"]);
    }

    #[tokio::test]
    async fn test_ambiguous_verdict_fails() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let backend = Arc::new(FakeBackend::with_judge(|_| {
            Ok(HallucinationVerdict::new(VerdictStatus::Ambiguous))
        }));
        let evaluator = evaluator(&server.url(), backend, config());

        let report = evaluator
            .run(pairs(&["a?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test]
    async fn test_network_error_keeps_every_prompt() {
        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator("localhost:9", backend.clone(), config());

        let report = evaluator
            .run(pairs(&["a?", "b?", "c?"]), Some(NegotiatedProtocol::variant(0).unwrap()))
            .await
            .unwrap();

        assert_eq!(report.summary.total_tests, 3);
        assert_eq!(report.summary.passed, 0);
        assert_eq!(report.summary.failed, 3);
        for result in &report.results {
            assert!(result.response.is_none());
            assert!(result.error.is_some());
            assert_eq!(result.judgement, Judgement::NotJudged);
        }
        assert!(backend
            .submitted()
            .iter()
            .all(|r| r.response.starts_with("Error:")));
    }

    #[tokio::test]
    async fn test_agent_error_status_fails_only_that_prompt() {
        let mut server = mockito::Server::new_async().await;
        let _broken = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"message": "explode"})))
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let _ok = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"message": "fine"})))
            .with_status(200)
            .with_body(r#"{"answer": "ok"}"#)
            .create_async()
            .await;

        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator(&server.url(), backend, config());
        let report = evaluator
            .run(
                pairs(&["fine", "explode", "fine"]),
                Some(NegotiatedProtocol::variant(1).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_scoring_policy_decides_unavailable_judge() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;

        let lenient = evaluator(
            &server.url(),
            Arc::new(FakeBackend::with_judge(|_| Err(EvalError::JudgeUnavailable))),
            config(),
        );
        let report = lenient
            .run(pairs(&["a?", "b?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.results[0].judgement, Judgement::Unavailable);

        let strict = evaluator(
            &server.url(),
            Arc::new(FakeBackend::with_judge(|_| {
                Err(EvalError::InvalidResponse {
                    message: "judge crashed".to_string(),
                })
            })),
            config().with_scoring_policy(ScoringPolicy::Strict),
        );
        let report = strict
            .run(pairs(&["a?", "b?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        assert_eq!(report.summary.passed, 0);
        assert_eq!(report.summary.failed, 2);
        assert!(report.results[0].judgement.is_inconclusive());
    }

    #[tokio::test]
    async fn test_empty_source_uses_default_questions() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator(&server.url(), backend.clone(), config());

        let report = evaluator
            .run(PromptSource::default(), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();

        assert_eq!(report.summary.total_tests, crate::types::DEFAULT_QUESTIONS.len());
        assert_eq!(
            backend.attached.lock().unwrap()[0].question,
            crate::types::DEFAULT_QUESTIONS[0]
        );
    }

    #[tokio::test]
    async fn test_max_prompts_caps_the_suite() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator(&server.url(), backend, config().with_max_prompts(2));

        let report = evaluator
            .run(pairs(&["a?", "b?", "c?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        assert_eq!(report.summary.total_tests, 2);
    }

    #[tokio::test]
    async fn test_document_source_goes_through_backend() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let mut backend = FakeBackend::passing();
        backend.document = vec![
            QaPair::new("What is covered?").with_answer("Everything"),
            QaPair::new("For how long?").with_answer("A year"),
        ];
        let evaluator = evaluator(&server.url(), Arc::new(backend), config());

        let report = evaluator
            .run(
                PromptSource::Document("policy.pdf".into()),
                Some(NegotiatedProtocol::variant(1).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(report.summary.total_tests, 2);
        assert_eq!(report.results[0].expected_answer.as_deref(), Some("Everything"));
    }

    #[tokio::test]
    async fn test_subject_failure_aborts_run() {
        let mut backend = FakeBackend::passing();
        backend.fail_subject = true;
        let evaluator = evaluator("http://localhost:9", Arc::new(backend), config());

        let result = evaluator.run(pairs(&["a?"]), None).await;
        assert!(matches!(result, Err(EvalError::Setup { .. })));
    }

    #[tokio::test]
    async fn test_attach_failure_uses_local_ids() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let mut backend = FakeBackend::passing();
        backend.fail_attach = true;
        let evaluator = evaluator(&server.url(), Arc::new(backend), config());

        let report = evaluator
            .run(pairs(&["a?", "b?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        let ids: Vec<&str> = report.results.iter().map(|r| r.prompt_id.as_str()).collect();
        assert_eq!(ids, vec!["local-1", "local-2"]);
    }

    #[tokio::test]
    async fn test_negotiates_once_when_no_protocol_given() {
        let mut server = mockito::Server::new_async().await;
        let chat = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#"^\{"messages":"#.to_string()))
            .with_status(400)
            .expect(1)
            .create_async()
            .await;
        let message = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#"^\{"message":"#.to_string()))
            .with_status(200)
            .with_body(r#"{"answer": "ok"}"#)
            .expect(4)
            .create_async()
            .await;

        let evaluator = evaluator(&server.url(), Arc::new(FakeBackend::passing()), config());
        let report = evaluator.run(pairs(&["a?", "b?", "c?"]), None).await.unwrap();

        assert_eq!(report.summary.passed, 3);
        chat.assert_async().await;
        message.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_negotiation_is_not_repeated() {
        let mut server = mockito::Server::new_async().await;
        let rejecting = server
            .mock("POST", "/")
            .with_status(400)
            .expect(crate::variants::VARIANT_COUNT)
            .create_async()
            .await;

        let backend = Arc::new(FakeBackend::passing());
        let evaluator = evaluator(&server.url(), backend.clone(), config());
        let report = evaluator.run(pairs(&["a?", "b?", "c?"]), None).await.unwrap();

        assert_eq!(report.summary.total_tests, 3);
        assert_eq!(report.summary.failed, 3);
        let errors: Vec<&str> = report
            .results
            .iter()
            .map(|r| r.error.as_deref().unwrap())
            .collect();
        assert!(errors[0].contains("No compatible request format"));
        assert!(errors.iter().all(|e| *e == errors[0]));
        assert_eq!(backend.submitted().len(), 3);
        rejecting.assert_async().await;
    }

    #[tokio::test]
    async fn test_lazy_negotiation_uses_probe_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let evaluator = evaluator(
            &format!("http://{}", address),
            Arc::new(FakeBackend::passing()),
            config(),
        )
        .with_probe_config(ProbeConfig::default().with_timeout(Duration::from_millis(100)));

        let started = Instant::now();
        let report = evaluator.run(pairs(&["a?", "b?"]), None).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(report.summary.failed, 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.error.as_deref().unwrap().contains("timed out")));
    }

    #[tokio::test]
    async fn test_anonymous_run_reports_session() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let evaluator = evaluator(&server.url(), Arc::new(FakeBackend::passing()), config());

        let report = evaluator
            .run(pairs(&["a?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();
        assert!(report.session.is_some());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let mut server = mockito::Server::new_async().await;
        let _agent = echo_agent(&mut server).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let evaluator = evaluator(&server.url(), Arc::new(FakeBackend::passing()), config())
            .with_progress_callback(move |p| sink.lock().unwrap().push(p.percent));
        evaluator
            .run(pairs(&["a?", "b?", "c?"]), Some(NegotiatedProtocol::variant(1).unwrap()))
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
