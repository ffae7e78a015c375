//! Session value types and the store that owns them.
//!
//! `SessionStore` is the single source of truth for the current problem, the
//! step transcript and the question history. Its operations are synchronous
//! and do no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TutorError};
use crate::mode::Mode;

/// Lowest score a completed problem can carry.
pub const MIN_SCORE: f64 = 0.0;

/// Highest score a completed problem can carry.
pub const MAX_SCORE: f64 = 10.0;

/// Difficulty level used when the service does not report one.
pub const DEFAULT_LEVEL: u32 = 1;

// ============================================================================
// ConversationStep
// ============================================================================

/// One submitted step of the Assist dialogue.
///
/// Serialized with the field names the generation service expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStep {
    /// 1-based position in the transcript.
    #[serde(rename = "step")]
    pub index: u32,

    /// The prompt the learner answered.
    #[serde(rename = "your_prompt")]
    pub prompt: String,

    /// The learner's answer.
    pub student_answer: String,
}

impl ConversationStep {
    /// Creates a new `ConversationStep`.
    #[must_use]
    pub fn new(index: u32, prompt: impl Into<String>, student_answer: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            student_answer: student_answer.into(),
        }
    }
}

// ============================================================================
// PastProblem
// ============================================================================

/// A completed problem, kept for difficulty adaptation and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastProblem {
    /// The problem statement.
    pub problem_text: String,

    /// Final score in `[0, 10]`.
    pub score: f64,

    /// Grader remarks, in the order received.
    pub remarks: Vec<String>,

    /// Difficulty level the problem was served at.
    pub level: u32,

    /// Mode the problem was finished in.
    pub mode: Mode,

    /// When the problem was completed.
    pub completed_at: DateTime<Utc>,
}

impl PastProblem {
    /// Creates a `PastProblem` stamped with the current time.
    ///
    /// The score is clamped into `[0, 10]`.
    #[must_use]
    pub fn new(
        problem_text: impl Into<String>,
        score: f64,
        remarks: Vec<String>,
        level: u32,
        mode: Mode,
    ) -> Self {
        Self {
            problem_text: problem_text.into(),
            score: score.clamp(MIN_SCORE, MAX_SCORE),
            remarks,
            level,
            mode,
            completed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// State of one learner's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// The problem being worked, if one has been acquired.
    pub current_problem: Option<String>,

    /// Difficulty level of the current problem.
    pub level: u32,

    /// Submitted steps for the current problem.
    pub transcript: Vec<ConversationStep>,

    /// Completed problems, oldest first.
    pub history: Vec<PastProblem>,

    /// Whether the current problem has been graded.
    pub complete: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            current_problem: None,
            level: DEFAULT_LEVEL,
            transcript: Vec::new(),
            history: Vec::new(),
            complete: false,
        }
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// Owns the `Session` and guards its invariants.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    session: Session,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the session value.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The current problem text, if any.
    #[must_use]
    pub fn current_problem(&self) -> Option<&str> {
        self.session.current_problem.as_deref()
    }

    /// The submitted steps for the current problem.
    #[must_use]
    pub fn transcript(&self) -> &[ConversationStep] {
        &self.session.transcript
    }

    /// Completed problems, oldest first.
    #[must_use]
    pub fn history(&self) -> &[PastProblem] {
        &self.session.history
    }

    /// The most recently completed problem.
    #[must_use]
    pub fn last_completed(&self) -> Option<&PastProblem> {
        self.session.history.last()
    }

    /// Whether the current problem has been graded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.session.complete
    }

    /// Whether any step answer has been recorded for the current problem.
    #[must_use]
    pub fn has_submitted(&self) -> bool {
        !self.session.transcript.is_empty()
    }

    /// Starts a new problem. History is kept.
    pub fn start(&mut self, problem_text: impl Into<String>, level: u32) {
        let problem_text = problem_text.into();
        info!(level, history = self.session.history.len(), "Starting problem");
        self.session.current_problem = Some(problem_text);
        self.session.level = level;
        self.session.transcript.clear();
        self.session.complete = false;
    }

    /// Appends a submitted step.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no problem is active, the problem is
    /// already complete, or `step.index` is not `transcript.len() + 1`.
    pub fn append_step(&mut self, step: ConversationStep) -> Result<()> {
        if self.session.current_problem.is_none() {
            return Err(TutorError::invariant("cannot record a step without a problem"));
        }
        if self.session.complete {
            return Err(TutorError::invariant(
                "cannot record a step after the problem is complete",
            ));
        }
        let expected = self.next_index();
        if step.index != expected {
            return Err(TutorError::invariant(format!(
                "out-of-order step index {}, expected {expected}",
                step.index
            )));
        }
        self.session.transcript.push(step);
        Ok(())
    }

    /// Records the graded problem and marks the session complete.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the current problem was already
    /// completed.
    pub fn record_completion(&mut self, past: PastProblem) -> Result<()> {
        if self.session.complete {
            return Err(TutorError::invariant("problem is already complete"));
        }
        info!(score = past.score, remarks = past.remarks.len(), "Problem complete");
        self.session.history.push(past);
        self.session.complete = true;
        Ok(())
    }

    /// Restores the empty initial value, history included.
    pub fn reset(&mut self) {
        self.session = Session::default();
    }

    /// The index the next appended step must carry.
    #[must_use]
    pub fn next_index(&self) -> u32 {
        u32::try_from(self.session.transcript.len())
            .map_or(u32::MAX, |len| len.saturating_add(1))
    }
}
