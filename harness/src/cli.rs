use clap::{Args, Parser, Subcommand};
use probe::{parse_headers, CustomEndpointConfig, EvalError, EvalResult};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "agent-eval")]
#[command(about = "Probe and evaluate HTTP conversational agents")]
pub struct Cli {
    /// Settings file (defaults to ./agent-eval.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Show every request attempt and per-prompt detail
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find a request format the agent understands
    Probe {
        /// Agent address, e.g. localhost:8000 or https://agent.example.com/chat
        endpoint: String,
        /// Question sent while probing
        #[arg(long, default_value = "Hello, can you hear me?")]
        question: String,
        #[command(flatten)]
        custom: CustomArgs,
    },
    /// Evaluate the agent against a question set
    Run(RunArgs),
    /// Show stored results for a test subject
    Results {
        subject_id: String,
        /// Anonymous session the subject was created under
        #[arg(long)]
        session: Option<Uuid>,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Have the backend answer and grade one question for a test subject
    Evaluate {
        subject_id: String,
        #[arg(long)]
        question: String,
        /// Reference answer; the subject's knowledge is used without one
        #[arg(long)]
        expected: Option<String>,
        /// Anonymous session the subject was created under
        #[arg(long)]
        session: Option<Uuid>,
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// Evaluation backend URL
    #[arg(long)]
    pub backend_url: Option<String>,
    /// Backend API key; an anonymous session is used without one
    #[arg(long)]
    pub api_key: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Agent address, e.g. localhost:8000 or https://agent.example.com/chat
    pub endpoint: String,
    /// JSON or JSON Lines file of question/answer pairs; globs allowed (repeatable)
    #[arg(long = "qa-file", value_name = "PATH")]
    pub qa_files: Vec<String>,
    /// PDF the backend turns into question/answer pairs
    #[arg(long, conflicts_with_all = ["qa_files", "questions"])]
    pub document: Option<PathBuf>,
    /// Question to ask (repeatable)
    #[arg(long = "question", value_name = "TEXT")]
    pub questions: Vec<String>,
    /// Maximum number of prompts to evaluate
    #[arg(long)]
    pub limit: Option<usize>,
    /// Count prompts without a judge verdict as failures
    #[arg(long)]
    pub strict: bool,
    /// Skip the connection test; the format is negotiated on the first prompt
    #[arg(long)]
    pub skip_probe: bool,
    #[command(flatten)]
    pub backend: BackendArgs,
    #[command(flatten)]
    pub custom: CustomArgs,
}

/// Flags that replace request-format negotiation.
#[derive(Args, Debug, Clone, Default)]
pub struct CustomArgs {
    /// Request header as `Name: value` or a JSON object (repeatable)
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,
    /// Request body with a {{question}} placeholder
    #[arg(long)]
    pub body_template: Option<String>,
    /// HTTP method for the custom request
    #[arg(long)]
    pub method: Option<String>,
    /// Dot/bracket path to the answer, e.g. data.choices[0].text
    #[arg(long)]
    pub response_field: Option<String>,
}

impl CustomArgs {
    pub fn to_config(&self) -> EvalResult<Option<CustomEndpointConfig>> {
        let Some(template) = &self.body_template else {
            if !self.headers.is_empty() || self.method.is_some() || self.response_field.is_some() {
                return Err(EvalError::InvalidConfig {
                    message: "--header, --method and --response-field require --body-template"
                        .to_string(),
                });
            }
            return Ok(None);
        };

        let mut config =
            CustomEndpointConfig::new(template.as_str()).with_headers(parse_headers(&self.headers)?);
        if let Some(method) = &self.method {
            config = config.with_method(method.as_str());
        }
        if let Some(field) = &self.response_field {
            config = config.with_response_field(field.as_str());
        }

        config.validate()?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "agent-eval",
            "run",
            "localhost:8000",
            "--qa-file",
            "qa/*.json",
            "--question",
            "Who are you?",
            "--limit",
            "5",
            "--strict",
            "--header",
            "Authorization: Bearer t",
            "--body-template",
            r#"{"q": "{{question}}"}"#,
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.endpoint, "localhost:8000");
        assert_eq!(args.qa_files, vec!["qa/*.json"]);
        assert_eq!(args.limit, Some(5));
        assert!(args.strict);

        let config = args.custom.to_config().unwrap().unwrap();
        assert_eq!(config.headers["Authorization"], "Bearer t");
        assert_eq!(config.method, "POST");
    }

    #[test]
    fn test_document_conflicts_with_questions() {
        let result = Cli::try_parse_from([
            "agent-eval",
            "run",
            "localhost:8000",
            "--document",
            "policy.pdf",
            "--question",
            "hi",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_flags_need_template() {
        let args = CustomArgs {
            method: Some("PUT".to_string()),
            ..CustomArgs::default()
        };
        assert!(matches!(args.to_config(), Err(EvalError::InvalidConfig { .. })));
        assert!(CustomArgs::default().to_config().unwrap().is_none());
    }

    #[test]
    fn test_results_session_must_be_uuid() {
        assert!(Cli::try_parse_from(["agent-eval", "results", "abc", "--session", "nope"]).is_err());
        let cli = Cli::try_parse_from([
            "agent-eval",
            "results",
            "abc",
            "--session",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Results { session: Some(_), .. }));
    }

    #[test]
    fn test_parse_evaluate_command() {
        assert!(Cli::try_parse_from(["agent-eval", "evaluate", "abc"]).is_err());

        let cli = Cli::try_parse_from([
            "agent-eval",
            "evaluate",
            "abc",
            "--question",
            "What is covered?",
            "--api-key",
            "k",
        ])
        .unwrap();
        let Commands::Evaluate {
            subject_id,
            question,
            expected,
            backend,
            ..
        } = cli.command
        else {
            panic!("expected evaluate");
        };
        assert_eq!(subject_id, "abc");
        assert_eq!(question, "What is covered?");
        assert_eq!(expected, None);
        assert_eq!(backend.api_key.as_deref(), Some("k"));
    }
}
