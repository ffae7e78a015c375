//! In-process stand-in for the tutoring service.
//!
//! Every endpoint pops its next scripted `(status, body)` reply and records
//! the request body, so tests can assert on both sides of the wire.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tutor_engine::{Config, RetrySettings};

type Reply = (StatusCode, Value);

/// Scripted replies and recorded requests.
#[derive(Debug, Default)]
pub struct Upstream {
    pub questions: VecDeque<Reply>,
    pub steps: VecDeque<Reply>,
    pub grades: VecDeque<Reply>,
    pub subjects: Vec<Value>,
    pub unhealthy: bool,
    pub question_requests: Vec<Value>,
    pub step_requests: Vec<Value>,
    pub grade_requests: Vec<Value>,
    pub subject_queries: Vec<HashMap<String, String>>,
    pub created_subjects: Vec<Value>,
}

impl Upstream {
    pub fn question(mut self, text: &str, level: u32) -> Self {
        self.questions
            .push_back((StatusCode::OK, json!({ "question": text, "level": level })));
        self
    }

    pub fn question_reply(mut self, status: StatusCode, body: Value) -> Self {
        self.questions.push_back((status, body));
        self
    }

    pub fn step(mut self, prompt: &str) -> Self {
        self.steps
            .push_back((StatusCode::OK, json!({ "type": "step", "next_step": prompt })));
        self
    }

    pub fn final_answer(mut self, marks: f64, remarks: &[&str], tip: &str) -> Self {
        self.steps.push_back((
            StatusCode::OK,
            json!({ "type": "final_answer", "marks": marks, "remarks": remarks, "tip": tip }),
        ));
        self
    }

    pub fn step_reply(mut self, status: StatusCode, body: Value) -> Self {
        self.steps.push_back((status, body));
        self
    }

    pub fn grade(mut self, marks: f64, correction: &str, remarks: &[&str]) -> Self {
        self.grades.push_back((
            StatusCode::OK,
            json!({ "marks": marks, "correction": correction, "remarks": remarks }),
        ));
        self
    }

    pub fn subject(mut self, id: &str, name: &str) -> Self {
        self.subjects.push(json!({
            "subject_id": id,
            "display_name": name,
            "subject": "math",
            "description": "",
            "curriculum_concepts": ["linear equations"],
        }));
        self
    }

    pub const fn unhealthy(mut self) -> Self {
        self.unhealthy = true;
        self
    }
}

pub type Shared = Arc<Mutex<Upstream>>;

fn pop(queue: &mut VecDeque<Reply>, what: &str) -> (StatusCode, Json<Value>) {
    let (status, body) = queue.pop_front().unwrap_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": format!("no scripted {what} reply") }),
        )
    });
    (status, Json(body))
}

async fn generate_question(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut upstream = state.lock().expect("upstream lock");
    upstream.question_requests.push(body);
    pop(&mut upstream.questions, "question")
}

async fn generate_steps(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut upstream = state.lock().expect("upstream lock");
    upstream.step_requests.push(body);
    pop(&mut upstream.steps, "step")
}

async fn grade_answer(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut upstream = state.lock().expect("upstream lock");
    upstream.grade_requests.push(body);
    pop(&mut upstream.grades, "grade")
}

async fn list_subjects(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut upstream = state.lock().expect("upstream lock");
    upstream.subject_queries.push(query);
    Json(Value::Array(upstream.subjects.clone()))
}

async fn create_subject(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut upstream = state.lock().expect("upstream lock");
    let id = format!("subject-{}", upstream.created_subjects.len() + 1);
    upstream.created_subjects.push(body);
    (
        StatusCode::CREATED,
        Json(json!({ "subject_id": id, "message": "Subject created" })),
    )
}

async fn health(State(state): State<Shared>) -> StatusCode {
    if state.lock().expect("upstream lock").unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Starts the fake service on an ephemeral port.
pub async fn spawn(upstream: Upstream) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(upstream));
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/generate-question", axum::routing::post(generate_question))
        .route("/api/v1/generate-steps", axum::routing::post(generate_steps))
        .route("/api/v1/grade-answer", axum::routing::post(grade_answer))
        .route("/api/v1/subjects", get(list_subjects).post(create_subject))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("http://{addr}"), state)
}

/// Config pointing at `base_url` with millisecond retry delays.
pub fn config_for(base_url: &str) -> Config {
    Config {
        api_base_url: base_url.to_string(),
        request_timeout_secs: 5,
        retry: RetrySettings {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..Config::default()
    }
}

/// A base URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);
    format!("http://{addr}")
}
