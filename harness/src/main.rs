use chrono::Local;
use clap::Parser;
use harness::cli::{Cli, Commands};
use harness::commands::{self, CliError, RunOutcome};
use harness::report;
use harness::settings::Settings;
use probe::Progress;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            match &e {
                CliError::Eval(inner) => {
                    eprintln!("✗ {}", inner.user_message());
                    if let Some(hint) = report::retry_hint(inner) {
                        eprintln!("  {}", hint);
                    }
                }
                other => eprintln!("✗ {}", other),
            }
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode, CliError> {
    let settings = Settings::load(cli.config.as_deref())?.with_env_overrides();

    match cli.command {
        Commands::Probe {
            endpoint,
            question,
            custom,
        } => {
            let custom = custom.to_config()?;
            let outcome = commands::probe_endpoint(
                &endpoint,
                &question,
                custom.as_ref(),
                settings.probe_config()?,
            )
            .await?;

            print!("{}", report::render_probe(&outcome, cli.verbose));
            Ok(exit_code(outcome.success()))
        }
        Commands::Run(args) => {
            let settings = commands::apply_backend_args(settings, &args.backend);
            println!(
                "Evaluating {} ({})",
                args.endpoint,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );

            let outcome = commands::run_evaluation(&args, &settings, print_progress).await?;
            eprintln!();

            match &outcome {
                RunOutcome::ProbeFailed(probe) => {
                    print!("{}", report::render_probe(probe, cli.verbose));
                }
                RunOutcome::Aborted { error, summary } => {
                    print!("{}", report::render_aborted(summary, error, cli.verbose));
                }
                RunOutcome::Completed { probe, report: run } => {
                    if let Some(probe) = probe {
                        print!("{}", report::render_probe(probe, cli.verbose));
                    }
                    println!();
                    print!("{}", report::render_report(run, cli.verbose));
                }
            }
            Ok(exit_code(outcome.is_success()))
        }
        Commands::Results {
            subject_id,
            session,
            backend,
        } => {
            let settings = commands::apply_backend_args(settings, &backend);
            let results = commands::fetch_stored(&subject_id, session, &settings).await?;
            print!("{}", report::render_stored(&subject_id, &results));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Evaluate {
            subject_id,
            question,
            expected,
            session,
            backend,
        } => {
            let settings = commands::apply_backend_args(settings, &backend);
            let evaluation = commands::evaluate_question(
                &subject_id,
                &question,
                expected.as_deref(),
                session,
                &settings,
            )
            .await?;
            print!(
                "{}",
                report::render_question_report(&subject_id, &question, &evaluation)
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_progress(progress: Progress) {
    let mut stderr = io::stderr();
    let _ = write!(stderr, "\r[{:>3}%] {:<40}", progress.percent, progress.stage);
    let _ = stderr.flush();
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
