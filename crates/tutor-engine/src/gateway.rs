//! Typed operations against the generation service.
//!
//! `TutorGateway` is the seam between session logic and the service. The
//! HTTP implementation builds requests, sends them through
//! `ResilientClient` and decodes responses. It never retries on its own.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::{Operation, ResilientClient};
use crate::config::Config;
use crate::error::Result;
use crate::offline::OfflineGateway;
use crate::session::{ConversationStep, PastProblem};
use crate::step::StepResult;
use crate::wire::{
    self, CreatedSubject, GenerateQuestionRequest, GenerateStepsRequest, GeneratedProblem,
    GradeAnswerRequest, Grade, NewSubject, Subject,
};

/// Operations the session engine needs from a problem source.
#[async_trait]
pub trait TutorGateway: Send + Sync {
    /// Short name for logs (`http`, `offline`).
    fn name(&self) -> &'static str;

    /// Generates a problem. `recent` is the most recent completed problem.
    async fn generate_problem(
        &self,
        user_id: &str,
        subject_id: &str,
        recent: Option<&PastProblem>,
    ) -> Result<GeneratedProblem>;

    /// Asks for the next step given the transcript so far.
    ///
    /// With `student_answer` set, the service grades a solo answer and may
    /// still reply with a step (a hint).
    async fn next_step(
        &self,
        problem_text: &str,
        transcript: &[ConversationStep],
        student_answer: Option<&str>,
    ) -> Result<StepResult>;

    /// Grades a single free-form answer.
    async fn grade_answer(&self, problem_text: &str, answer: &str) -> Result<Grade>;

    /// Lists the learner's subjects.
    async fn list_subjects(&self, user_id: &str) -> Result<Vec<Subject>>;

    /// Creates a subject.
    async fn create_subject(&self, subject: &NewSubject) -> Result<CreatedSubject>;

    /// Returns `true` if the service answers its health endpoint.
    async fn health_check(&self) -> bool;
}

// ============================================================================
// HttpGateway
// ============================================================================

/// Gateway to the remote generation service.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: ResilientClient,
    model_name: String,
}

impl HttpGateway {
    /// Creates a gateway over an existing client.
    #[must_use]
    pub fn new(client: ResilientClient, model_name: impl Into<String>) -> Self {
        Self {
            client,
            model_name: model_name.into(),
        }
    }

    /// Creates a reqwest-backed gateway for the configured service.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ResilientClient::from_config(config)?,
            config.model_name.clone(),
        ))
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, request: &T) -> Result<serde_json::Value> {
        let operation = Operation::post(path, wire::to_body(request)?);
        self.client.execute(&operation).await
    }
}

#[async_trait]
impl TutorGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn generate_problem(
        &self,
        user_id: &str,
        subject_id: &str,
        recent: Option<&PastProblem>,
    ) -> Result<GeneratedProblem> {
        let request = GenerateQuestionRequest::new(&self.model_name, user_id, subject_id, recent);
        debug!(
            user_id,
            subject_id,
            previous = request.previous_questions.len(),
            "Requesting problem"
        );
        let body = self.post(wire::GENERATE_QUESTION_PATH, &request).await?;
        wire::decode_problem(body)
    }

    async fn next_step(
        &self,
        problem_text: &str,
        transcript: &[ConversationStep],
        student_answer: Option<&str>,
    ) -> Result<StepResult> {
        let request = GenerateStepsRequest {
            model_name: self.model_name.clone(),
            question: problem_text.to_string(),
            conversation_history: transcript.to_vec(),
            student_answer: student_answer.map(str::to_string),
        };
        debug!(
            transcript = transcript.len(),
            graded = student_answer.is_some(),
            "Requesting next step"
        );
        let body = self.post(wire::GENERATE_STEPS_PATH, &request).await?;
        wire::decode_step_result(body, transcript.len())
    }

    async fn grade_answer(&self, problem_text: &str, answer: &str) -> Result<Grade> {
        let request = GradeAnswerRequest {
            model_name: self.model_name.clone(),
            question: problem_text.to_string(),
            student_answer: answer.to_string(),
        };
        let body = self.post(wire::GRADE_ANSWER_PATH, &request).await?;
        wire::decode_grade(body)
    }

    async fn list_subjects(&self, user_id: &str) -> Result<Vec<Subject>> {
        let operation = Operation::get(wire::SUBJECTS_PATH).with_query("user_id", user_id);
        let body = self.client.execute(&operation).await?;
        wire::decode_subjects(body)
    }

    async fn create_subject(&self, subject: &NewSubject) -> Result<CreatedSubject> {
        let body = self.post(wire::SUBJECTS_PATH, subject).await?;
        wire::from_body(body, "create-subject")
    }

    async fn health_check(&self) -> bool {
        match self.client.execute(&Operation::get(wire::HEALTH_PATH)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Service selection
// ============================================================================

/// Which backend a session is talking to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// The remote generation service.
    #[default]
    Online,
    /// The built-in problem bank.
    Offline,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// The gateway chosen at startup.
#[derive(Clone)]
pub struct Selection {
    /// Gateway to use.
    pub gateway: Arc<dyn TutorGateway>,
    /// Whether it is the remote service or the built-in bank.
    pub mode: ServiceMode,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("gateway", &self.gateway.name())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Selection {
    /// An offline selection backed by the built-in bank.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            gateway: Arc::new(OfflineGateway::new()),
            mode: ServiceMode::Offline,
        }
    }
}

/// Picks the remote or offline gateway at startup.
#[derive(Debug, Clone)]
pub struct ServiceSelector {
    force_offline: bool,
    offline_fallback: bool,
}

impl ServiceSelector {
    /// Creates a selector from the configuration flags.
    #[must_use]
    pub const fn new(config: &Config) -> Self {
        Self {
            force_offline: config.force_offline,
            offline_fallback: config.offline_fallback,
        }
    }

    /// Builds the HTTP gateway from `config` and selects.
    pub async fn select(&self, config: &Config) -> Result<Selection> {
        if self.force_offline {
            info!("Offline mode forced by configuration");
            return Ok(Selection::offline());
        }
        let online = Arc::new(HttpGateway::from_config(config)?);
        Ok(self.select_with(online).await)
    }

    /// Selects between `online` and the offline bank.
    ///
    /// The offline bank is used when offline mode is forced, or when the
    /// health check fails and fallback is allowed.
    pub async fn select_with(&self, online: Arc<dyn TutorGateway>) -> Selection {
        if self.force_offline {
            info!("Offline mode forced by configuration");
            return Selection::offline();
        }
        if online.health_check().await {
            info!(gateway = online.name(), "Tutoring service is healthy");
            return Selection {
                gateway: online,
                mode: ServiceMode::Online,
            };
        }
        if self.offline_fallback {
            warn!("Tutoring service unavailable, using offline problem bank");
            Selection::offline()
        } else {
            warn!("Tutoring service unavailable and offline fallback is disabled");
            Selection {
                gateway: online,
                mode: ServiceMode::Online,
            }
        }
    }
}
