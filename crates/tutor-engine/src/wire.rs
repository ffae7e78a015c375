//! JSON shapes exchanged with the generation service.
//!
//! Request types serialize to the snake_case bodies the service expects.
//! Response decoding happens here so that anything the service sends outside
//! the documented shapes becomes a `ProtocolError` at the boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, TutorError};
use crate::session::{ConversationStep, PastProblem, DEFAULT_LEVEL, MAX_SCORE, MIN_SCORE};
use crate::step::StepResult;

/// `POST` endpoint that generates a problem.
pub const GENERATE_QUESTION_PATH: &str = "/api/v1/generate-question";

/// `POST` endpoint that generates the next step or a final grade.
pub const GENERATE_STEPS_PATH: &str = "/api/v1/generate-steps";

/// `POST` endpoint that grades a single free-form answer.
pub const GRADE_ANSWER_PATH: &str = "/api/v1/grade-answer";

/// `GET` (list) and `POST` (create) endpoint for subjects.
pub const SUBJECTS_PATH: &str = "/api/v1/subjects";

/// `GET` liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Sentinel `step_number` marking completion in the flat step payload.
pub const COMPLETION_SENTINEL: i64 = -1;

/// Serializes a request body.
pub fn to_body<T: Serialize>(request: &T) -> Result<Value> {
    serde_json::to_value(request)
        .map_err(|e| TutorError::protocol(format!("failed to encode request: {e}")))
}

/// Decodes a response body into `T`, naming `what` in the error.
pub fn from_body<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| TutorError::protocol(format!("unexpected {what} response: {e}")))
}

// ============================================================================
// generate-question
// ============================================================================

/// A completed problem as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousQuestion {
    /// Problem statement.
    pub question: String,
    /// Whole-number score.
    pub score: i64,
    /// Grader remarks.
    pub remarks: Vec<String>,
}

impl From<&PastProblem> for PreviousQuestion {
    #[allow(clippy::cast_possible_truncation)]
    fn from(past: &PastProblem) -> Self {
        Self {
            question: past.problem_text.clone(),
            score: past.score.clamp(MIN_SCORE, MAX_SCORE).round() as i64,
            remarks: past.remarks.clone(),
        }
    }
}

/// Body of `POST /api/v1/generate-question`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateQuestionRequest {
    /// Model the service should use.
    pub model_name: String,
    /// Learner id.
    pub user_id: String,
    /// Subject id.
    pub subject_id: String,
    /// At most one prior problem.
    pub previous_questions: Vec<PreviousQuestion>,
}

impl GenerateQuestionRequest {
    /// Builds the request, keeping only the most recent past problem.
    #[must_use]
    pub fn new(
        model_name: impl Into<String>,
        user_id: impl Into<String>,
        subject_id: impl Into<String>,
        recent: Option<&PastProblem>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            user_id: user_id.into(),
            subject_id: subject_id.into(),
            previous_questions: recent.map(PreviousQuestion::from).into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateQuestionResponse {
    question: String,
    #[serde(default)]
    level: Option<u32>,
}

/// A generated problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProblem {
    /// Problem statement.
    pub problem_text: String,
    /// Difficulty level, 1 when the service omits it.
    pub level: u32,
}

/// Decodes a `generate-question` response.
pub fn decode_problem(body: Value) -> Result<GeneratedProblem> {
    let response: GenerateQuestionResponse = from_body(body, "generate-question")?;
    if response.question.trim().is_empty() {
        return Err(TutorError::protocol("generate-question returned an empty question"));
    }
    Ok(GeneratedProblem {
        problem_text: response.question,
        level: response.level.unwrap_or(DEFAULT_LEVEL),
    })
}

// ============================================================================
// generate-steps
// ============================================================================

/// Body of `POST /api/v1/generate-steps`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateStepsRequest {
    /// Model the service should use.
    pub model_name: String,
    /// Problem statement.
    pub question: String,
    /// Submitted steps so far.
    pub conversation_history: Vec<ConversationStep>,
    /// Free-form answer for solo grading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StepBody {
    next_step: String,
}

#[derive(Debug, Deserialize)]
struct FinalAnswerBody {
    marks: f64,
    #[serde(default)]
    remarks: Option<Vec<String>>,
    #[serde(default)]
    tip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatStepBody {
    step_number: i64,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    marks: Option<f64>,
    #[serde(default, alias = "mistakes")]
    remarks: Option<Vec<String>>,
    #[serde(default)]
    tip: Option<String>,
}

/// Checks a score from the service and clamps it into `[0, 10]`.
pub fn validate_marks(marks: f64) -> Result<f64> {
    if !marks.is_finite() {
        return Err(TutorError::protocol(format!("marks must be a number, got {marks}")));
    }
    if !(MIN_SCORE..=MAX_SCORE).contains(&marks) {
        warn!(marks, "Score outside 0..=10, clamping");
    }
    Ok(marks.clamp(MIN_SCORE, MAX_SCORE))
}

fn non_empty(tip: Option<String>) -> Option<String> {
    tip.filter(|t| !t.trim().is_empty())
}

fn complete(marks: f64, remarks: Option<Vec<String>>, tip: Option<String>) -> Result<StepResult> {
    Ok(StepResult::Complete {
        score: validate_marks(marks)?,
        remarks: remarks.unwrap_or_default(),
        tip: non_empty(tip),
    })
}

/// Decodes a `generate-steps` response against the transcript it answers.
///
/// Tagged replies: `"step"` becomes `Continue` at `transcript_len + 1`,
/// `"final_answer"` becomes `Complete`. Replies without a `type` field use
/// the flat shape, where `step_number == -1` is the completion sentinel.
pub fn decode_step_result(body: Value, transcript_len: usize) -> Result<StepResult> {
    let next_index = u32::try_from(transcript_len)
        .ok()
        .and_then(|len| len.checked_add(1))
        .ok_or_else(|| TutorError::protocol("transcript too long"))?;

    let tag = match body.get("type") {
        Some(Value::String(tag)) => Some(tag.clone()),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(TutorError::protocol(format!(
                "step response type must be a string, got {other}"
            )))
        }
    };

    match tag.as_deref() {
        Some("step") => {
            let step: StepBody = from_body(body, "generate-steps")?;
            Ok(StepResult::Continue {
                step_index: next_index,
                prompt: step.next_step,
            })
        }
        Some("final_answer") => {
            let done: FinalAnswerBody = from_body(body, "generate-steps")?;
            complete(done.marks, done.remarks, done.tip)
        }
        Some(other) => Err(TutorError::protocol(format!(
            "unknown step response type '{other}'"
        ))),
        None => decode_flat(body, next_index),
    }
}

fn decode_flat(body: Value, next_index: u32) -> Result<StepResult> {
    let flat: FlatStepBody = from_body(body, "generate-steps")?;
    match flat.step_number {
        COMPLETION_SENTINEL => {
            let marks = flat
                .marks
                .ok_or_else(|| TutorError::protocol("completion response is missing marks"))?;
            complete(marks, flat.remarks, flat.tip)
        }
        n if n == i64::from(next_index) => Ok(StepResult::Continue {
            step_index: next_index,
            prompt: flat
                .prompt
                .ok_or_else(|| TutorError::protocol("step response is missing prompt"))?,
        }),
        n if n > 0 => Err(TutorError::protocol(format!(
            "step number {n} does not follow the transcript, expected {next_index}"
        ))),
        n => Err(TutorError::protocol(format!("invalid step number {n}"))),
    }
}

// ============================================================================
// grade-answer
// ============================================================================

/// Body of `POST /api/v1/grade-answer`.
#[derive(Debug, Clone, Serialize)]
pub struct GradeAnswerRequest {
    /// Model the service should use.
    pub model_name: String,
    /// Problem statement.
    pub question: String,
    /// The learner's answer.
    pub student_answer: String,
}

#[derive(Debug, Deserialize)]
struct GradeAnswerResponse {
    marks: f64,
    #[serde(default)]
    correction: Option<String>,
    #[serde(default)]
    remarks: Option<Vec<String>>,
}

/// A graded solo answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    /// Score in `[0, 10]`.
    pub marks: f64,
    /// Corrected working, if the grader gave one.
    pub correction: Option<String>,
    /// Grader remarks.
    pub remarks: Vec<String>,
}

/// Decodes a `grade-answer` response.
pub fn decode_grade(body: Value) -> Result<Grade> {
    let response: GradeAnswerResponse = from_body(body, "grade-answer")?;
    Ok(Grade {
        marks: validate_marks(response.marks)?,
        correction: non_empty(response.correction),
        remarks: response.remarks.unwrap_or_default(),
    })
}

// ============================================================================
// subjects
// ============================================================================

/// A subject from the learner's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject id used in `generate-question`.
    pub subject_id: String,
    /// Name to show the learner.
    #[serde(default)]
    pub display_name: String,
    /// Broad subject area.
    #[serde(default)]
    pub subject: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Concepts covered.
    #[serde(default)]
    pub curriculum_concepts: Vec<String>,
}

impl Subject {
    /// The display name, or the id when the name is blank.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.subject_id
        } else {
            &self.display_name
        }
    }
}

/// Body of `POST /api/v1/subjects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSubject {
    /// Owning learner.
    pub user_id: String,
    /// Name to show the learner.
    pub display_name: String,
    /// Broad subject area.
    pub subject: String,
    /// Short description.
    pub description: String,
    /// Concepts covered.
    pub curriculum_concepts: Vec<String>,
}

/// Response of `POST /api/v1/subjects`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedSubject {
    /// Id of the new subject.
    pub subject_id: String,
    /// Confirmation message.
    #[serde(default)]
    pub message: String,
}

/// Decodes a subject list.
pub fn decode_subjects(body: Value) -> Result<Vec<Subject>> {
    from_body(body, "subjects")
}
