//! Adaptive Tutor CLI
//!
//! Interactive terminal client: acquires problems, runs the Assist step
//! dialogue or grades Solo answers, and writes a progress report on exit.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing_subscriber::EnvFilter;
use tutor_engine::{
    Config, Mode, PastProblem, RecoveryAction, ServiceMode, ServiceSelector, SessionEvent,
    SessionOrchestrator, SubjectCatalog, Subject, ToggleOutcome, TurnOutcome, TutorError,
};
use tutor_report::{
    json::JsonGenerator, AttemptedProblem, MarkdownGenerator, PracticeMode, ReportGenerator,
    ReportInput,
};

/// Report file name without extension.
const REPORT_STEM: &str = "tutor-report";

/// Adaptive Tutor - guided problem practice
///
/// Generates problems for a learner and either walks them through the
/// solution step by step (assist) or grades a single answer (solo).
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Base URL of the tutoring service
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Learner id
    #[arg(short, long, env = "TUTOR_USER_ID", value_name = "ID")]
    user: String,

    /// Subject id (default: the learner's first subject)
    #[arg(short, long, value_name = "ID")]
    subject: Option<String>,

    /// Starting mode: solo or assist
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<Mode>,

    /// Use the built-in offline problem bank
    #[arg(long)]
    offline: bool,

    /// Output directory for reports
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    Mode::from_str_case_insensitive(value)
        .ok_or_else(|| format!("invalid mode '{value}': expected 'solo' or 'assist'"))
}

/// A line typed by the learner.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Answer(String),
    ToggleMode,
    Next,
    Retry,
    Offline,
    History,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix(':') else {
            return Self::Answer(line.to_string());
        };
        match command.trim().to_lowercase().as_str() {
            "mode" => Self::ToggleMode,
            "next" => Self::Next,
            "retry" => Self::Retry,
            "offline" => Self::Offline,
            "history" => Self::History,
            "help" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, selects a gateway, picks a subject, then runs the
/// interactive loop and writes reports.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref api_url) = args.api_url {
        config.api_base_url.clone_from(api_url);
    }
    if let Some(mode) = args.mode {
        config.default_mode = mode;
    }
    if args.offline {
        config.force_offline = true;
    }
    if let Some(ref output_dir) = args.output_dir {
        config.output_dir.clone_from(output_dir);
    }

    // Re-validate after overrides
    config.validate()?;
    print_config(&config);

    let selection = ServiceSelector::new(&config).select(&config).await?;
    if selection.mode == ServiceMode::Offline {
        println!("Using the built-in offline problem bank");
    }

    let catalog = SubjectCatalog::new();
    let subjects = match catalog.list(selection.gateway.as_ref(), &args.user).await {
        Ok(subjects) => subjects,
        Err(e) => {
            tracing::warn!(error = %e, "Could not list subjects");
            Vec::new()
        }
    };
    let subject_id = pick_subject(&subjects, args.subject.as_deref()).ok_or_else(|| {
        anyhow::anyhow!(
            "No subjects found for learner '{}'\n\nSuggestion: Pass --subject with a subject id",
            args.user
        )
    })?;
    print_subjects(&subjects, &subject_id);

    let orchestrator = SessionOrchestrator::new(Arc::clone(&selection.gateway), &args.user, &subject_id)
        .with_config(&config)
        .with_service_mode(selection.mode);
    let mut events = orchestrator.subscribe();
    let started_at = Utc::now();

    print_help();
    run_session(&orchestrator, &mut events).await?;

    let history = orchestrator.snapshot().await.history;
    if history.is_empty() {
        println!("No problems completed, no report written");
        return Ok(());
    }
    write_reports(
        &history,
        &args.user,
        &subject_id,
        started_at,
        Path::new(&config.output_dir),
    )
}

fn write_prompt(out: &mut impl Write) -> std::io::Result<()> {
    write!(out, "> ")?;
    out.flush()
}

/// Reads commands from stdin until `:quit`, end of input, or Ctrl+C.
async fn run_session(
    orchestrator: &SessionOrchestrator,
    events: &mut broadcast::Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    if let Err(e) = acquire_problem(orchestrator, false).await {
        print_error(&e);
    }
    render_events(events);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write_prompt(&mut std::io::stdout().lock()).context("failed to write the prompt")?;

        let line = tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                println!();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let command = Command::parse(&line);
        if command == Command::Quit {
            break;
        }
        if let Err(e) = handle_command(orchestrator, command).await {
            print_error(&e);
        }
        render_events(events);
    }

    Ok(())
}

async fn handle_command(
    orchestrator: &SessionOrchestrator,
    command: Command,
) -> Result<(), TutorError> {
    match command {
        Command::Answer(answer) => {
            let outcome = orchestrator.submit_answer(&answer).await?;
            print_outcome(&outcome);
        }
        Command::ToggleMode => {
            if orchestrator.toggle_mode().await == ToggleOutcome::Switched(Mode::Assist) {
                orchestrator.ensure_first_step().await?;
            }
        }
        Command::Next => acquire_problem(orchestrator, true).await?,
        Command::Retry => {
            let outcome = orchestrator.retry().await?;
            if matches!(outcome, TurnOutcome::Problem { .. }) {
                orchestrator.ensure_first_step().await?;
            } else {
                print_outcome(&outcome);
            }
        }
        Command::Offline => {
            orchestrator.enter_offline_mode().await?;
            acquire_problem(orchestrator, true).await?;
        }
        Command::History => print_history(&orchestrator.snapshot().await.history),
        Command::Help => print_help(),
        Command::Unknown(name) => println!("Unknown command ':{name}', type :help"),
        Command::Empty | Command::Quit => {}
    }
    Ok(())
}

/// Gets a problem and, in Assist, its first step.
async fn acquire_problem(
    orchestrator: &SessionOrchestrator,
    fresh: bool,
) -> Result<(), TutorError> {
    if fresh {
        orchestrator.start_new_problem().await?;
    } else {
        orchestrator.ensure_problem().await?;
    }
    orchestrator.ensure_first_step().await?;
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load_from_dir(Path::new("."))?,
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Picks the requested subject, or the first listed one.
fn pick_subject(subjects: &[Subject], requested: Option<&str>) -> Option<String> {
    if let Some(requested) = requested {
        if !subjects.is_empty() && !subjects.iter().any(|s| s.subject_id == requested) {
            tracing::warn!(subject = requested, "Subject not in the learner's catalog");
        }
        return Some(requested.to_string());
    }
    subjects.first().map(|s| s.subject_id.clone())
}

// ============================================================================
// Output
// ============================================================================

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Service: {}", config.api_base_url);
    println!("  Model: {}", config.model_name);
    println!("  Mode: {}", config.default_mode);
    println!("  Output directory: {}", config.output_dir);
}

fn print_subjects(subjects: &[Subject], selected: &str) {
    if subjects.is_empty() {
        return;
    }
    println!();
    println!("Subjects:");
    for subject in subjects {
        let marker = if subject.subject_id == selected { "*" } else { " " };
        println!(" {marker} {} ({})", subject.label(), subject.subject_id);
    }
}

fn print_help() {
    println!();
    println!("Type an answer, or one of:");
    println!("  :mode     switch between solo and assist");
    println!("  :next     start a new problem");
    println!("  :retry    retry the last failed request");
    println!("  :offline  continue with the offline problem bank");
    println!("  :history  show completed problems");
    println!("  :quit     exit and write the progress report");
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Hint(hint) => println!("Not graded yet: {hint}"),
        TurnOutcome::Skipped => tracing::debug!("Nothing to do"),
        TurnOutcome::Stale => tracing::debug!("Response arrived for an earlier problem"),
        // Rendered from session events
        TurnOutcome::Problem { .. } | TurnOutcome::Step(_) | TurnOutcome::Completed(_) => {}
    }
}

fn print_error(err: &TutorError) {
    println!("{}", err.user_message());
    tracing::debug!(error = %err, kind = %err.kind(), "Command failed");
    match err.recovery() {
        RecoveryAction::RetryOrGoOffline => {
            println!("Type :retry to try again or :offline to continue offline");
        }
        RecoveryAction::Retry => println!("Type :retry to try again"),
        RecoveryAction::Report => println!("Type :next to start a new problem"),
    }
}

/// Prints every queued session event.
fn render_events(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => render_event(&event),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Session events dropped");
            }
            Err(_) => break,
        }
    }
}

fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::ProblemReady(p) => {
            println!();
            println!("Problem (level {}): {}", p.level, p.problem_text);
        }
        SessionEvent::StepReady(p) => println!("Step {}: {}", p.index, p.prompt),
        SessionEvent::StepRecorded(p) => {
            tracing::debug!(index = p.index, transcript = p.transcript_len, "Answer recorded");
        }
        SessionEvent::SessionComplete(p) => {
            println!();
            println!("Score: {:.1}/10", p.score);
            for remark in &p.remarks {
                println!("  - {remark}");
            }
            if let Some(tip) = &p.tip {
                println!("Tip: {tip}");
            }
            println!("Type :next for another problem");
        }
        SessionEvent::ModeChanged(p) => println!("Mode: {}", p.mode),
        SessionEvent::ModeRejected(p) => println!("Cannot switch mode: {}", p.reason),
        SessionEvent::DegradedMode(p) => println!("Offline: {}", p.reason),
        // Printed with its recovery hint by print_error
        SessionEvent::Error(p) => tracing::debug!(kind = %p.kind, "Error event"),
    }
}

fn print_history(history: &[PastProblem]) {
    if history.is_empty() {
        println!("No problems completed yet");
        return;
    }
    for (index, past) in history.iter().enumerate() {
        println!(
            "{}. [{}] {} - {:.1}/10",
            index + 1,
            past.mode,
            past.problem_text,
            past.score
        );
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Writes Markdown and JSON progress reports to `output_dir`.
fn write_reports(
    history: &[PastProblem],
    learner_id: &str,
    subject_id: &str,
    started_at: DateTime<Utc>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    println!();
    println!("Generating reports...");

    let input = create_report_input(history, learner_id, subject_id, started_at);
    let report = ReportGenerator::new(&input).generate()?;

    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join(format!("{REPORT_STEM}.md"));
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join(format!("{REPORT_STEM}.json"));
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    if let Some(average) = report.summary.average_score {
        println!();
        println!(
            "Problems completed: {} (average {average:.1}/10)",
            report.summary.problems_completed
        );
    }
    Ok(())
}

fn create_report_input(
    history: &[PastProblem],
    learner_id: &str,
    subject_id: &str,
    started_at: DateTime<Utc>,
) -> ReportInput {
    ReportInput::new(learner_id, subject_id)
        .started_at(started_at)
        .ended_at(Utc::now())
        .problems(history.iter().map(convert_problem).collect())
}

fn convert_problem(past: &PastProblem) -> AttemptedProblem {
    AttemptedProblem::at_time(
        past.completed_at,
        past.problem_text.clone(),
        past.score,
        past.remarks.clone(),
        past.level,
        convert_mode(past.mode),
    )
}

const fn convert_mode(mode: Mode) -> PracticeMode {
    match mode {
        Mode::Solo => PracticeMode::Solo,
        Mode::Assist => PracticeMode::Assist,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Accepts writes but fails every flush.
    struct BrokenPipe(Vec<u8>);

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_write_prompt() {
        let mut out = Vec::new();
        write_prompt(&mut out).unwrap();
        assert_eq!(out, b"> ");
    }

    #[test]
    fn test_write_prompt_reports_flush_failure() {
        let mut out = BrokenPipe(Vec::new());
        let err = write_prompt(&mut out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert_eq!(out.0, b"> ");
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("  x = 4 "), Command::Answer("x = 4".to_string()));
        assert_eq!(Command::parse(":mode"), Command::ToggleMode);
        assert_eq!(Command::parse(":NEXT"), Command::Next);
        assert_eq!(Command::parse(": retry"), Command::Retry);
        assert_eq!(Command::parse(":offline"), Command::Offline);
        assert_eq!(Command::parse(":history"), Command::History);
        assert_eq!(Command::parse(":q"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse(":jump"), Command::Unknown("jump".to_string()));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("Assist"), Ok(Mode::Assist));
        assert_eq!(parse_mode("solo"), Ok(Mode::Solo));
        assert!(parse_mode("turbo").is_err());
    }

    #[test]
    fn test_args_require_user() {
        let args = Args::try_parse_from(["tutor", "--user", "u1", "--mode", "assist", "--offline"])
            .unwrap();
        assert_eq!(args.user, "u1");
        assert_eq!(args.mode, Some(Mode::Assist));
        assert!(args.offline);
    }

    fn subject(id: &str) -> Subject {
        Subject {
            subject_id: id.to_string(),
            display_name: String::new(),
            subject: String::new(),
            description: String::new(),
            curriculum_concepts: vec![],
        }
    }

    #[test]
    fn test_pick_subject() {
        let subjects = vec![subject("alg"), subject("geo")];
        assert_eq!(pick_subject(&subjects, None), Some("alg".to_string()));
        assert_eq!(pick_subject(&subjects, Some("geo")), Some("geo".to_string()));
        assert_eq!(pick_subject(&[], Some("calc")), Some("calc".to_string()));
        assert_eq!(pick_subject(&[], None), None);
    }

    #[test]
    fn test_report_input_conversion() {
        let history = vec![
            PastProblem::new("q1", 8.0, vec!["sign".to_string()], 2, Mode::Assist),
            PastProblem::new("q2", 5.0, vec![], 1, Mode::Solo),
        ];
        let input = create_report_input(&history, "u1", "alg", Utc::now());

        assert_eq!(input.problems.len(), 2);
        assert_eq!(input.problems[0].mode, PracticeMode::Assist);
        assert_eq!(input.problems[0].level, 2);
        assert_eq!(input.problems[1].completed_at, history[1].completed_at);
        assert!(input.validate().is_ok());
    }
}
