//! Interaction modes and the rule that locks them.
//!
//! A problem is worked either in `Solo` (one free-form answer, graded in a
//! single call) or `Assist` (guided step dialogue). Once an answer has been
//! recorded in Assist the learner cannot go back to Solo until a new problem
//! starts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::step::ActiveStep;

/// Reason attached to a rejected Assist to Solo switch.
pub const MODE_LOCKED_REASON: &str = "mode can only be changed on a new problem";

// ============================================================================
// Mode
// ============================================================================

/// How the learner works through the current problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A single free-form answer, graded in one call.
    #[default]
    Solo,
    /// Guided, multi-turn step dialogue.
    Assist,
}

impl Mode {
    /// Returns the other mode.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Solo => Self::Assist,
            Self::Assist => Self::Solo,
        }
    }

    /// Returns the lowercase name used in config files and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Assist => "assist",
        }
    }

    /// Parses a mode name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "solo" | "normal" => Some(Self::Solo),
            "assist" => Some(Self::Assist),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid mode '{s}': expected one of 'solo', 'assist'"
            ))
        })
    }
}

impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Toggle rule
// ============================================================================

/// Result of asking to switch modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The switch happened; carries the new mode.
    Switched(Mode),
    /// The switch was refused; carries a learner-facing reason.
    Rejected(String),
}

/// Decides a mode switch from the current mode.
///
/// Assist to Solo is refused once an answer was submitted in Assist for the
/// current problem. Solo to Assist is always allowed.
#[must_use]
pub fn toggle(current: Mode, has_submitted_in_assist: bool) -> ToggleOutcome {
    match current {
        Mode::Assist if has_submitted_in_assist => {
            ToggleOutcome::Rejected(MODE_LOCKED_REASON.to_string())
        }
        mode => ToggleOutcome::Switched(mode.other()),
    }
}

// ============================================================================
// ModeArbiter
// ============================================================================

/// Tracks the active mode and any Assist step parked during a Solo detour.
#[derive(Debug, Clone, Default)]
pub struct ModeArbiter {
    mode: Mode,
    parked: Option<ActiveStep>,
}

impl ModeArbiter {
    /// Creates an arbiter starting in `mode`.
    #[must_use]
    pub const fn new(mode: Mode) -> Self {
        Self { mode, parked: None }
    }

    /// The active mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Applies the toggle rule and switches on success.
    pub fn toggle(&mut self, has_submitted_in_assist: bool) -> ToggleOutcome {
        let outcome = toggle(self.mode, has_submitted_in_assist);
        if let ToggleOutcome::Switched(mode) = outcome {
            debug!(from = %self.mode, to = %mode, "Mode switched");
            self.mode = mode;
        }
        outcome
    }

    /// Holds an unsubmitted Assist step while the learner is in Solo.
    pub fn park(&mut self, step: ActiveStep) {
        self.parked = Some(step);
    }

    /// Takes the parked step, if any.
    pub fn take_parked(&mut self) -> Option<ActiveStep> {
        self.parked.take()
    }

    /// Drops the parked step for a new problem. The chosen mode carries over.
    pub fn new_problem(&mut self) {
        self.parked = None;
    }
}
