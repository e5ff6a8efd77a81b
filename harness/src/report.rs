//! Plain-text rendering of probe outcomes and run summaries.

use probe::prober::AttemptOutcome;
use probe::{
    EvalError, EvaluationResult, ExtractionSource, Judgement, ProbeOutcome, QuestionReport,
    RunReport, RunSummary, StoredResult,
};
use std::fmt::Write;

const FALLBACK_TAG: &str = "(unparsed response)";

/// Suggests running again when the failure may be transient.
pub fn retry_hint(error: &EvalError) -> Option<&'static str> {
    error
        .is_retryable()
        .then_some("This may be temporary; try the command again.")
}

pub fn render_probe(outcome: &ProbeOutcome, verbose: bool) -> String {
    let mut out = String::new();
    let mark = if outcome.success() { "✓" } else { "✗" };
    let _ = writeln!(out, "{} {}", mark, outcome.message);

    if let Some(sample) = outcome.sample() {
        if outcome.sample_is_fallback() {
            let _ = writeln!(out, "  Sample {}: {}", FALLBACK_TAG, sample);
        } else {
            let _ = writeln!(out, "  Sample: {}", sample);
        }
    }

    if let Some(hint) = outcome.error().as_ref().and_then(retry_hint) {
        let _ = writeln!(out, "  {}", hint);
    }

    if verbose || !outcome.success() {
        for attempt in &outcome.attempts {
            let position = attempt
                .variant_index
                .map(|i| format!("{:>2}", i + 1))
                .unwrap_or_else(|| " -".to_string());
            let _ = writeln!(
                out,
                "  [{}] {:<14} {}",
                position,
                attempt.label,
                describe_attempt(&attempt.outcome)
            );
        }
    }

    let _ = writeln!(out, "  Took {:.1}s", outcome.duration.as_secs_f64());
    out
}

fn describe_attempt(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Matched => "ok".to_string(),
        AttemptOutcome::Status { status } => format!("HTTP {}", status),
        AttemptOutcome::EmptyAnswer { status } => format!("HTTP {} with no usable answer", status),
        AttemptOutcome::Transport { failure } => failure.to_string(),
    }
}

pub fn render_report(report: &RunReport, verbose: bool) -> String {
    let mut out = String::new();

    if verbose {
        for (index, result) in report.results.iter().enumerate() {
            out.push_str(&render_result(index + 1, result));
        }
        out.push('\n');
    }

    out.push_str(&render_summary(&report.summary));
    if let Some(session) = report.session {
        let _ = writeln!(out, "Session:     {}", session);
        let _ = writeln!(
            out,
            "  agent-eval results {} --session {}",
            report.subject_id, session
        );
    }
    out
}

fn render_result(position: usize, result: &EvaluationResult) -> String {
    let mut out = String::new();
    let mark = if result.success { "✓" } else { "✗" };
    let _ = writeln!(out, "{} {}. {}", mark, position, result.question);

    match (&result.response, &result.error) {
        (Some(response), _) if result.extraction_source == Some(ExtractionSource::Stringified) => {
            let _ = writeln!(out, "    Answer {}: {}", FALLBACK_TAG, single_line(response, 160));
        }
        (Some(response), _) => {
            let _ = writeln!(out, "    Answer: {}", single_line(response, 160));
        }
        (None, Some(error)) => {
            let _ = writeln!(out, "    Error: {}", error);
        }
        (None, None) => {}
    }

    if let Some(expected) = &result.expected_answer {
        let _ = writeln!(out, "    Expected: {}", single_line(expected, 160));
    }

    let judged = match &result.judgement {
        Judgement::Verdict { verdict } if verdict.summary.is_empty() => verdict.status.to_string(),
        Judgement::Verdict { verdict } => format!("{} ({})", verdict.status, verdict.summary),
        Judgement::Unavailable => "judge unavailable".to_string(),
        Judgement::Error { message } => format!("judge error: {}", message),
        Judgement::NotJudged => "not judged".to_string(),
    };
    let _ = writeln!(out, "    Verdict: {}", judged);
    out
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total tests: {}", summary.total_tests);
    let _ = writeln!(out, "Passed:      {}", summary.passed);
    let _ = writeln!(out, "Failed:      {}", summary.failed);
    let _ = writeln!(out, "Pass rate:   {:.0}%", summary.pass_rate() * 100.0);
    let _ = writeln!(out, "Duration:    {:.1}s", summary.duration.as_secs_f64());
    if let Some(url) = &summary.results_url {
        let _ = writeln!(out, "Results:     {}", url);
    }
    out
}

/// Output for a run that failed before any prompt was evaluated.
pub fn render_aborted(summary: &RunSummary, error: &EvalError, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "✗ {}", error.user_message());
    if verbose {
        let _ = writeln!(out, "  {}", error);
    }
    if let Some(hint) = retry_hint(error) {
        let _ = writeln!(out, "  {}", hint);
    }
    out.push('\n');
    out.push_str(&render_summary(summary));
    out
}

pub fn render_stored(subject_id: &str, results: &[StoredResult]) -> String {
    let mut out = String::new();
    let passed = results.iter().filter(|r| r.passed()).count();
    let _ = writeln!(
        out,
        "Subject {}: {} stored results, {} passed",
        subject_id,
        results.len(),
        passed
    );

    for result in results {
        let mark = if result.passed() { "✓" } else { "✗" };
        let prompt = result.prompt_id.as_deref().unwrap_or("?");
        let response = result.response.as_deref().unwrap_or("");
        let _ = write!(out, "{} [{}] {}", mark, prompt, single_line(response, 120));
        if let Some(label) = &result.hallucination_label {
            let _ = write!(out, " ({})", label);
        }
        out.push('\n');
    }
    out
}

pub fn render_question_report(subject_id: &str, question: &str, report: &QuestionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Subject {}: {}", subject_id, question);
    let _ = writeln!(
        out,
        "  Label:         {}",
        report.label.as_deref().unwrap_or("none")
    );
    if let Some(justification) = &report.justification {
        let _ = writeln!(out, "  Justification: {}", single_line(justification, 400));
    }
    for fact in &report.facts {
        let text = match fact {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let _ = writeln!(out, "  - {}", single_line(&text, 160));
    }
    out
}

fn single_line(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let mut cut: String = flat.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
