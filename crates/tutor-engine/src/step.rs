//! Assist-mode step dialogue.
//!
//! `StepController` tracks where the guided dialogue is:
//!
//! - `Idle` -> `AwaitingFirstStep` when a problem exists with an empty
//!   transcript
//! - `AwaitingFirstStep` / `Submitting` -> `HasActiveStep` on a `Continue`
//! - `AwaitingFirstStep` / `Submitting` -> `Completed` on a `Complete`
//! - `HasActiveStep` -> `Submitting` when the learner answers
//! - any fetching phase -> `Idle` when the fetch fails
//!
//! The controller holds no I/O. The orchestrator calls `begin_*`, performs
//! the remote call, then feeds the outcome back through `apply` or `fail`.
//! `park`/`restore` carry an unanswered step across a Solo detour, and
//! `complete` ends the dialogue when a solo grade arrives instead.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::session::ConversationStep;

// ============================================================================
// StepResult
// ============================================================================

/// Outcome of asking the service for the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    /// Another step for the learner to answer.
    Continue {
        /// 1-based index of the step.
        step_index: u32,
        /// Prompt to show the learner.
        prompt: String,
    },
    /// The dialogue is over and the problem is graded.
    Complete {
        /// Score in `[0, 10]`.
        score: f64,
        /// Grader remarks.
        remarks: Vec<String>,
        /// Optional improvement tip.
        tip: Option<String>,
    },
}

// ============================================================================
// StepPhase
// ============================================================================

/// Phase of the Assist dialogue for the current problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    /// Nothing in flight and no step showing.
    #[default]
    Idle,
    /// The first step has been requested.
    AwaitingFirstStep,
    /// A step is waiting for the learner's answer.
    HasActiveStep,
    /// An answer was recorded and the next step has been requested.
    Submitting,
    /// The dialogue ended with a grade.
    Completed,
}

impl StepPhase {
    /// Returns `true` while a step request is outstanding.
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        matches!(self, Self::AwaitingFirstStep | Self::Submitting)
    }
}

/// A step shown to the learner and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStep {
    /// 1-based index; equals the transcript length plus one.
    pub index: u32,
    /// Prompt to show the learner.
    pub prompt: String,
}

// ============================================================================
// StepController
// ============================================================================

/// State machine for the Assist dialogue.
#[derive(Debug, Clone, Default)]
pub struct StepController {
    phase: StepPhase,
    active: Option<ActiveStep>,
}

impl StepController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> StepPhase {
        self.phase
    }

    /// The step waiting for an answer, if any.
    #[must_use]
    pub const fn active_step(&self) -> Option<&ActiveStep> {
        self.active.as_ref()
    }

    /// Moves to `AwaitingFirstStep` if the dialogue has not started.
    ///
    /// Returns `false` (and changes nothing) if a fetch is already in flight,
    /// a step is showing, the transcript is not empty, or the dialogue is over.
    pub fn begin_first_step(&mut self, transcript_len: usize) -> bool {
        if transcript_len != 0 || self.phase != StepPhase::Idle || self.active.is_some() {
            return false;
        }
        self.phase = StepPhase::AwaitingFirstStep;
        true
    }

    /// Re-requests the next step after a failed fetch.
    ///
    /// Returns `false` unless the controller is `Idle` with no active step.
    pub fn begin_retry(&mut self, transcript_len: usize) -> bool {
        if self.phase != StepPhase::Idle || self.active.is_some() {
            return false;
        }
        self.phase = if transcript_len == 0 {
            StepPhase::AwaitingFirstStep
        } else {
            StepPhase::Submitting
        };
        true
    }

    /// Takes the active step as a submitted answer and moves to `Submitting`.
    ///
    /// The step leaves "active" before the caller fetches the next one.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no step is waiting for an answer.
    pub fn submit(&mut self, answer: impl Into<String>) -> Result<ConversationStep> {
        if self.phase != StepPhase::HasActiveStep {
            return Err(TutorError::invariant(format!(
                "cannot submit an answer while {:?}",
                self.phase
            )));
        }
        let Some(step) = self.active.take() else {
            return Err(TutorError::invariant("no active step to answer"));
        };
        self.phase = StepPhase::Submitting;
        Ok(ConversationStep::new(step.index, step.prompt, answer))
    }

    /// Applies a step result from the service.
    pub fn apply(&mut self, result: &StepResult) {
        match result {
            StepResult::Continue { step_index, prompt } => {
                self.active = Some(ActiveStep {
                    index: *step_index,
                    prompt: prompt.clone(),
                });
                self.phase = StepPhase::HasActiveStep;
            }
            StepResult::Complete { .. } => {
                self.active = None;
                self.phase = StepPhase::Completed;
            }
        }
    }

    /// Records a failed fetch. Recorded answers stay; no step is active.
    pub fn fail(&mut self) {
        self.active = None;
        self.phase = StepPhase::Idle;
    }

    /// Removes the active step so it can be held across a Solo detour.
    pub fn park(&mut self) -> Option<ActiveStep> {
        let step = self.active.take()?;
        self.phase = StepPhase::Idle;
        Some(step)
    }

    /// Puts a parked step back as the active step.
    pub fn restore(&mut self, step: ActiveStep) {
        self.active = Some(step);
        self.phase = StepPhase::HasActiveStep;
    }

    /// Marks the dialogue finished without a step fetch (solo grading).
    pub fn complete(&mut self) {
        self.active = None;
        self.phase = StepPhase::Completed;
    }

    /// Returns to `Idle` for a new problem.
    pub fn reset(&mut self) {
        self.active = None;
        self.phase = StepPhase::Idle;
    }
}
