//! Retry, failure classification and offline fallback over real HTTP.

mod fake_upstream;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tutor_engine::{
    Config, FailureKind, HttpGateway, Mode, NewSubject, RecoveryAction, ServiceMode,
    ServiceSelector, SessionOrchestrator, SubjectCatalog, TurnOutcome, TutorError, TutorGateway,
    CONFIG_FILE_NAME,
};

use fake_upstream::{closed_port_url, config_for, spawn, Upstream};

fn gateway(config: &Config) -> Arc<dyn TutorGateway> {
    Arc::new(HttpGateway::from_config(config).expect("Failed to build gateway"))
}

// ============================================================================
// Configuration
// ============================================================================

/// A config file written under the exported name points the gateway at the
/// fake service.
#[tokio::test]
async fn test_config_file_from_directory() {
    let (url, _state) = spawn(Upstream::default().question("Solve for x: x - 3 = 4", 1)).await;
    let dir = std::env::temp_dir().join("tutor-integration-config");
    std::fs::create_dir_all(&dir).expect("Failed to create dir");
    std::fs::write(
        dir.join(CONFIG_FILE_NAME),
        json!({ "apiBaseUrl": url, "retry": { "maxRetries": 0 } }).to_string(),
    )
    .expect("Failed to write config");

    let config = Config::load_from_dir(&dir).expect("config");
    std::fs::remove_file(dir.join(CONFIG_FILE_NAME)).ok();
    std::fs::remove_dir(&dir).ok();

    assert_eq!(CONFIG_FILE_NAME, "tutor.json");
    assert_eq!(config.api_base_url, url);
    let problem = gateway(&config)
        .generate_problem("learner-1", "algebra", None)
        .await
        .expect("problem");
    assert_eq!(problem.problem_text, "Solve for x: x - 3 = 4");
}

// ============================================================================
// Retry
// ============================================================================

/// A 503 is retried and the later success is returned.
#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let upstream = Upstream::default()
        .question_reply(StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": "warming up" }))
        .question("Solve for x: 2x + 5 = 13", 1);
    let (url, state) = spawn(upstream).await;

    let problem = gateway(&config_for(&url))
        .generate_problem("learner-1", "algebra", None)
        .await
        .expect("problem after retry");

    assert_eq!(problem.problem_text, "Solve for x: 2x + 5 = 13");
    assert_eq!(state.lock().expect("upstream lock").question_requests.len(), 2);
}

/// A 404 surfaces at once with the server's detail and code.
#[tokio::test]
async fn test_not_found_is_not_retried() {
    let upstream = Upstream::default().question_reply(
        StatusCode::NOT_FOUND,
        json!({ "detail": "Subject not found", "error": "subject_missing" }),
    );
    let (url, state) = spawn(upstream).await;

    let err = gateway(&config_for(&url))
        .generate_problem("learner-1", "unknown", None)
        .await
        .expect_err("404 should fail");

    match &err {
        TutorError::ApiError {
            status,
            message,
            code,
        } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "Subject not found");
            assert_eq!(code.as_deref(), Some("subject_missing"));
        }
        other => panic!("Expected ApiError, got: {other:?}"),
    }
    assert_eq!(err.kind(), FailureKind::Permanent);
    assert_eq!(err.recovery(), RecoveryAction::Retry);
    assert_eq!(state.lock().expect("upstream lock").question_requests.len(), 1);
}

/// An unknown step type is a protocol failure and is not retried.
#[tokio::test]
async fn test_unknown_step_type_is_protocol_error() {
    let upstream = Upstream::default()
        .question("Solve for x: 2x + 5 = 13", 1)
        .step_reply(StatusCode::OK, json!({ "type": "celebration" }));
    let (url, state) = spawn(upstream).await;
    let orch = SessionOrchestrator::new(gateway(&config_for(&url)), "learner-1", "algebra")
        .with_mode(Mode::Assist);

    orch.ensure_problem().await.expect("problem");
    let err = orch.ensure_first_step().await.expect_err("protocol failure");

    assert!(matches!(err, TutorError::ProtocolError { .. }));
    assert_eq!(err.recovery(), RecoveryAction::Report);
    assert_eq!(state.lock().expect("upstream lock").step_requests.len(), 1);
}

// ============================================================================
// Offline fallback
// ============================================================================

/// Exhausted 429s leave the session retryable, then offline takes over.
#[tokio::test]
async fn test_rate_limit_exhaustion_then_offline() {
    let upstream = Upstream::default()
        .question_reply(StatusCode::TOO_MANY_REQUESTS, json!({ "detail": "slow down" }))
        .question_reply(StatusCode::TOO_MANY_REQUESTS, json!({ "detail": "slow down" }))
        .question_reply(StatusCode::TOO_MANY_REQUESTS, json!({ "detail": "slow down" }));
    let (url, state) = spawn(upstream).await;
    let config = config_for(&url);
    let orch = SessionOrchestrator::new(gateway(&config), "learner-1", "algebra")
        .with_config(&config)
        .with_mode(Mode::Solo);

    let err = orch.ensure_problem().await.expect_err("rate limited");
    assert!(matches!(err, TutorError::ApiError { status: 429, .. }));
    assert_eq!(err.recovery(), RecoveryAction::RetryOrGoOffline);
    assert_eq!(state.lock().expect("upstream lock").question_requests.len(), 3);

    orch.enter_offline_mode().await.expect("offline");
    let outcome = orch.ensure_problem().await.expect("offline problem");
    assert!(matches!(outcome, TurnOutcome::Problem { .. }));

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.service_mode, ServiceMode::Offline);
    assert!(snapshot.problem_text.is_some());
    assert_eq!(state.lock().expect("upstream lock").question_requests.len(), 3);
}

/// An unreachable service selects the offline bank when fallback is on.
#[tokio::test]
async fn test_unreachable_service_selects_offline() {
    let config = config_for(&closed_port_url().await);

    let selection = ServiceSelector::new(&config)
        .select(&config)
        .await
        .expect("selection");
    assert_eq!(selection.mode, ServiceMode::Offline);
    assert_eq!(selection.gateway.name(), "offline");

    let strict = Config {
        offline_fallback: false,
        ..config
    };
    let selection = ServiceSelector::new(&strict)
        .select(&strict)
        .await
        .expect("selection");
    assert_eq!(selection.mode, ServiceMode::Online);
    assert_eq!(selection.gateway.name(), "http");
}

/// A failing health endpoint counts as unreachable.
#[tokio::test]
async fn test_unhealthy_service_selects_offline() {
    let (url, _state) = spawn(Upstream::default().unhealthy()).await;
    let config = config_for(&url);

    let selection = ServiceSelector::new(&config)
        .select(&config)
        .await
        .expect("selection");
    assert_eq!(selection.mode, ServiceMode::Offline);
}

/// A healthy service is used as-is.
#[tokio::test]
async fn test_healthy_service_selects_online() {
    let (url, _state) = spawn(Upstream::default()).await;
    let config = config_for(&url);

    let selection = ServiceSelector::new(&config)
        .select(&config)
        .await
        .expect("selection");
    assert_eq!(selection.mode, ServiceMode::Online);
}

/// An unreachable service reports a network failure after every attempt.
#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let config = config_for(&closed_port_url().await);

    let err = gateway(&config)
        .generate_problem("learner-1", "algebra", None)
        .await
        .expect_err("connection refused");

    match err {
        TutorError::NetworkError { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("Expected NetworkError, got: {other:?}"),
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// Subjects are cached per learner until one is created.
#[tokio::test]
async fn test_subject_catalog_caches_until_create() {
    let upstream = Upstream::default()
        .subject("algebra", "Algebra I")
        .subject("geometry", "Geometry");
    let (url, state) = spawn(upstream).await;
    let gateway = gateway(&config_for(&url));
    let catalog = SubjectCatalog::new();

    let subjects = catalog
        .list(gateway.as_ref(), "learner-1")
        .await
        .expect("subjects");
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].subject_id, "algebra");
    catalog
        .list(gateway.as_ref(), "learner-1")
        .await
        .expect("cached subjects");
    assert_eq!(state.lock().expect("upstream lock").subject_queries.len(), 1);

    let created = catalog
        .create(
            gateway.as_ref(),
            &NewSubject {
                user_id: "learner-1".to_string(),
                display_name: "Fractions".to_string(),
                subject: "math".to_string(),
                description: "Adding and simplifying fractions".to_string(),
                curriculum_concepts: vec!["common denominators".to_string()],
            },
        )
        .await
        .expect("created");
    assert_eq!(created.subject_id, "subject-1");
    assert!(catalog.cached("learner-1").await.is_none());

    catalog
        .list(gateway.as_ref(), "learner-1")
        .await
        .expect("refetched subjects");

    let upstream = state.lock().expect("upstream lock");
    assert_eq!(upstream.subject_queries.len(), 2);
    assert_eq!(
        upstream.subject_queries[0].get("user_id").map(String::as_str),
        Some("learner-1")
    );
    assert_eq!(upstream.created_subjects[0]["display_name"], "Fractions");
}
