//! End-to-end session tests against an in-process tutoring service.
//!
//! Each test stands up the fake upstream with scripted replies, drives a
//! `SessionOrchestrator` over the real reqwest transport, and checks both
//! the session state and the requests the service received.

mod fake_upstream;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tutor_engine::{
    Config, HttpGateway, Mode, SessionOrchestrator, SoloGrading, TurnOutcome, TutorGateway,
};
use tutor_report::{
    AttemptedProblem, MarkdownGenerator, PracticeMode, ReportGenerator, ReportInput,
};

use fake_upstream::{config_for, spawn, Upstream};

fn orchestrator(config: &Config, mode: Mode) -> SessionOrchestrator {
    let gateway: Arc<dyn TutorGateway> =
        Arc::new(HttpGateway::from_config(config).expect("Failed to build gateway"));
    SessionOrchestrator::new(gateway, "learner-1", "algebra")
        .with_config(config)
        .with_mode(mode)
}

fn expect_step(outcome: TurnOutcome) -> (u32, String) {
    match outcome {
        TurnOutcome::Step(step) => (step.index, step.prompt),
        other => panic!("Expected a step, got: {other:?}"),
    }
}

// ============================================================================
// Assist
// ============================================================================

/// Walks a full Assist dialogue and checks the transcript sent each turn.
#[tokio::test]
async fn test_assist_session_over_http() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 2)
        .step("Subtract 5 from both sides")
        .step("Divide both sides by 2")
        .final_answer(8.0, &["Sign slip in step 1"], "Check signs when moving terms");
    let (url, state) = spawn(upstream).await;
    let config = config_for(&url);
    let orch = orchestrator(&config, Mode::Assist);

    let problem = orch.ensure_problem().await.expect("problem");
    assert_eq!(
        problem,
        TurnOutcome::Problem {
            problem_text: "Solve for x: 2x + 5 = 13".to_string(),
            level: 2
        }
    );

    let (index, prompt) = expect_step(orch.ensure_first_step().await.expect("first step"));
    assert_eq!((index, prompt.as_str()), (1, "Subtract 5 from both sides"));

    let (index, _) = expect_step(orch.submit_step_answer("2x = 8").await.expect("step 2"));
    assert_eq!(index, 2);

    let done = orch.submit_step_answer("x = 4").await.expect("completion");
    let TurnOutcome::Completed(completion) = done else {
        panic!("Expected completion, got: {done:?}");
    };
    assert!((completion.score - 8.0).abs() < f64::EPSILON);
    assert_eq!(completion.tip.as_deref(), Some("Check signs when moving terms"));

    let upstream = state.lock().expect("upstream lock");
    assert_eq!(upstream.step_requests.len(), 3);

    let first = &upstream.step_requests[0];
    assert_eq!(first["model_name"], "gemini-2.5-flash");
    assert_eq!(first["question"], "Solve for x: 2x + 5 = 13");
    assert_eq!(first["conversation_history"], json!([]));
    assert!(first.get("student_answer").is_none());

    let last = &upstream.step_requests[2];
    assert_eq!(
        last["conversation_history"],
        json!([
            { "step": 1, "your_prompt": "Subtract 5 from both sides", "student_answer": "2x = 8" },
            { "step": 2, "your_prompt": "Divide both sides by 2", "student_answer": "x = 4" },
        ])
    );
}

/// The next problem request carries the most recent completed problem only.
#[tokio::test]
async fn test_next_problem_sends_recent_history() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .final_answer(7.6, &["Arithmetic slip"], "")
        .question("Solve for y: 4y - 7 = 2y + 9", 1)
        .final_answer(9.0, &[], "")
        .question("Simplify: 3(x + 4) - 2x", 2);
    let (url, state) = spawn(upstream).await;
    let orch = orchestrator(&config_for(&url), Mode::Solo);

    orch.ensure_problem().await.expect("problem 1");
    orch.submit_solo_answer("x = 4").await.expect("grade 1");
    orch.start_new_problem().await.expect("problem 2");
    orch.submit_solo_answer("y = 8").await.expect("grade 2");
    orch.start_new_problem().await.expect("problem 3");

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.level, 2);

    let upstream = state.lock().expect("upstream lock");
    let requests = &upstream.question_requests;
    assert_eq!(requests[0]["previous_questions"], json!([]));
    assert_eq!(
        requests[1]["previous_questions"],
        json!([{ "question": "Solve for x: 2x + 5 = 13", "score": 8, "remarks": ["Arithmetic slip"] }])
    );
    assert_eq!(
        requests[2]["previous_questions"][0]["question"],
        "Solve for y: 4y - 7 = 2y + 9"
    );
    assert_eq!(requests[2]["user_id"], "learner-1");
    assert_eq!(requests[2]["subject_id"], "algebra");
}

/// Concurrent first-step triggers reach the service once.
#[tokio::test]
async fn test_duplicate_first_step_triggers_over_http() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .step("Subtract 5 from both sides");
    let (url, state) = spawn(upstream).await;
    let orch = orchestrator(&config_for(&url), Mode::Assist);
    orch.ensure_problem().await.expect("problem");

    let outcomes = join_all((0..4).map(|_| orch.ensure_first_step())).await;
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(state.lock().expect("upstream lock").step_requests.len(), 1);

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.active_step.map(|s| s.index), Some(1));
}

/// Flat `{step_number, ...}` replies are understood.
#[tokio::test]
async fn test_legacy_flat_step_payload() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .step_reply(
            axum::http::StatusCode::OK,
            json!({ "step_number": 1, "prompt": "Subtract 5" }),
        )
        .step_reply(
            axum::http::StatusCode::OK,
            json!({ "step_number": -1, "marks": 6, "mistakes": ["Forgot to divide"] }),
        );
    let (url, _state) = spawn(upstream).await;
    let orch = orchestrator(&config_for(&url), Mode::Assist);

    orch.ensure_problem().await.expect("problem");
    let (index, prompt) = expect_step(orch.ensure_first_step().await.expect("step"));
    assert_eq!((index, prompt.as_str()), (1, "Subtract 5"));

    let done = orch.submit_step_answer("2x = 8").await.expect("completion");
    let TurnOutcome::Completed(completion) = done else {
        panic!("Expected completion, got: {done:?}");
    };
    assert_eq!(completion.remarks, vec!["Forgot to divide".to_string()]);
    assert!(completion.tip.is_none());
}

// ============================================================================
// Solo
// ============================================================================

/// Solo answers go to generate-steps; a step reply is a hint.
#[tokio::test]
async fn test_solo_grading_via_steps() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .step("What do you get after subtracting 5?")
        .final_answer(10.0, &[], "");
    let (url, state) = spawn(upstream).await;
    let orch = orchestrator(&config_for(&url), Mode::Solo);
    orch.ensure_problem().await.expect("problem");

    let hint = orch.submit_answer("x = 9").await.expect("hint");
    assert_eq!(
        hint,
        TurnOutcome::Hint("What do you get after subtracting 5?".to_string())
    );
    let done = orch.submit_answer("x = 4").await.expect("grade");
    assert!(matches!(done, TurnOutcome::Completed(_)));

    let upstream = state.lock().expect("upstream lock");
    assert_eq!(upstream.step_requests[0]["student_answer"], "x = 9");
    assert_eq!(upstream.step_requests[1]["student_answer"], "x = 4");
    assert_eq!(upstream.step_requests[1]["conversation_history"], json!([]));
}

/// With `gradeEndpoint` solo answers go to grade-answer.
#[tokio::test]
async fn test_solo_grading_via_grade_endpoint() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .grade(4.0, "x = 4", &["Divided before subtracting"]);
    let (url, state) = spawn(upstream).await;
    let config = Config {
        solo_grading: SoloGrading::GradeEndpoint,
        ..config_for(&url)
    };
    let orch = orchestrator(&config, Mode::Solo);
    orch.ensure_problem().await.expect("problem");

    let done = orch.submit_solo_answer("x = 6.5").await.expect("grade");
    let TurnOutcome::Completed(completion) = done else {
        panic!("Expected completion, got: {done:?}");
    };
    assert!((completion.score - 4.0).abs() < f64::EPSILON);
    assert_eq!(completion.tip.as_deref(), Some("x = 4"));

    let upstream = state.lock().expect("upstream lock");
    assert!(upstream.step_requests.is_empty());
    assert_eq!(upstream.grade_requests[0]["student_answer"], "x = 6.5");
    assert_eq!(upstream.grade_requests[0]["question"], "Solve for x: 2x + 5 = 13");
}

// ============================================================================
// Report
// ============================================================================

/// A finished session turns into a Markdown progress report.
#[tokio::test]
async fn test_session_history_to_report() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .final_answer(9.0, &["Show your working"], "")
        .question("Simplify: 3(x + 4) - 2x", 1)
        .final_answer(5.0, &["show your working"], "");
    let (url, _state) = spawn(upstream).await;
    let orch = orchestrator(&config_for(&url), Mode::Solo);

    orch.ensure_problem().await.expect("problem 1");
    orch.submit_solo_answer("x = 4").await.expect("grade 1");
    orch.start_new_problem().await.expect("problem 2");
    orch.submit_solo_answer("x + 11").await.expect("grade 2");

    let problems = orch
        .snapshot()
        .await
        .history
        .iter()
        .map(|p| {
            AttemptedProblem::at_time(
                p.completed_at,
                p.problem_text.clone(),
                p.score,
                p.remarks.clone(),
                p.level,
                PracticeMode::Solo,
            )
        })
        .collect();
    let input = ReportInput::new("learner-1", "algebra").problems(problems);
    let report = ReportGenerator::new(&input).generate().expect("report");

    assert_eq!(report.summary.problems_completed, 2);
    assert_eq!(report.summary.solo_count, 2);
    assert_eq!(report.recurring_remarks[0].count, 2);

    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("| Average Score | 7.0/10 |"));
    assert!(markdown.contains("### Problem 2: Simplify: 3\\(x + 4\\) - 2x"));
    assert!(markdown.contains("**[recurring]**"));
}
