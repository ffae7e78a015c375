//! Tutor Progress Reports
//!
//! Turns a learner's completed problems into a progress report. Reports can
//! be serialized to JSON for programmatic access or rendered to Markdown for
//! the learner.
//!
//! # Types
//!
//! - [`ReportInput`] - What the session recorded: learner, subject, timing
//!   and the attempted problems
//! - [`ReportGenerator`] - Derives a [`Report`] from an input
//! - [`Report`] - Summary, problems, recurring remarks and recommendations
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - JSON output, compact or pretty
//! - [`MarkdownGenerator`] - Human-readable Markdown output
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{AttemptedProblem, PracticeMode, ReportGenerator, ReportInput};
//! use tutor_report::json::JsonGenerator;
//!
//! let input = ReportInput::new("learner-1", "algebra").problem(AttemptedProblem::new(
//!     "Solve for x: 2x + 5 = 13",
//!     8.0,
//!     vec!["Check the sign when moving terms".to_string()],
//!     1,
//!     PracticeMode::Assist,
//! ));
//!
//! let report = ReportGenerator::new(&input).generate().unwrap();
//! assert_eq!(report.summary.problems_completed, 1);
//!
//! let json = JsonGenerator::new(&report).generate_pretty().unwrap();
//! assert!(json.contains("recurring_remarks"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest score a problem can receive.
pub const MAX_SCORE: f64 = 10.0;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// PracticeMode (local copy to avoid cross-crate dependency)
// ============================================================================

/// How a problem was worked.
///
/// Mirrors the engine's `Mode` so this crate stays independent of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    /// Free-form answer, graded once.
    #[default]
    Solo,
    /// Guided step dialogue.
    Assist,
}

impl PracticeMode {
    /// Returns the display label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Solo => "Solo",
            Self::Assist => "Assist",
        }
    }
}

impl std::fmt::Display for PracticeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Input
// ============================================================================

/// A completed problem as recorded by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptedProblem {
    /// Problem statement.
    pub problem_text: String,

    /// Score in `[0, 10]`.
    pub score: f64,

    /// Grader remarks.
    pub remarks: Vec<String>,

    /// Difficulty level.
    pub level: u32,

    /// Mode the problem was worked in.
    pub mode: PracticeMode,

    /// When the problem was graded.
    pub completed_at: DateTime<Utc>,
}

impl AttemptedProblem {
    /// Creates an attempt completed now.
    #[must_use]
    pub fn new(
        problem_text: impl Into<String>,
        score: f64,
        remarks: Vec<String>,
        level: u32,
        mode: PracticeMode,
    ) -> Self {
        Self::at_time(Utc::now(), problem_text, score, remarks, level, mode)
    }

    /// Creates an attempt completed at `completed_at`.
    #[must_use]
    pub fn at_time(
        completed_at: DateTime<Utc>,
        problem_text: impl Into<String>,
        score: f64,
        remarks: Vec<String>,
        level: u32,
        mode: PracticeMode,
    ) -> Self {
        Self {
            problem_text: problem_text.into(),
            score,
            remarks,
            level,
            mode,
            completed_at,
        }
    }
}

/// Everything a report is derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInput {
    /// Learner id.
    pub learner_id: String,

    /// Subject the problems were generated for.
    pub subject_id: String,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the session ended.
    pub ended_at: DateTime<Utc>,

    /// Completed problems, oldest first.
    pub problems: Vec<AttemptedProblem>,
}

impl ReportInput {
    /// Creates an input for a session starting and ending now.
    #[must_use]
    pub fn new(learner_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            learner_id: learner_id.into(),
            subject_id: subject_id.into(),
            started_at: now,
            ended_at: now,
            problems: Vec::new(),
        }
    }

    /// Sets the session start.
    #[must_use]
    pub const fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Sets the session end.
    #[must_use]
    pub const fn ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = ended_at;
        self
    }

    /// Adds a completed problem.
    #[must_use]
    pub fn problem(mut self, problem: AttemptedProblem) -> Self {
        self.problems.push(problem);
        self
    }

    /// Sets all completed problems at once.
    #[must_use]
    pub fn problems(mut self, problems: Vec<AttemptedProblem>) -> Self {
        self.problems = problems;
        self
    }

    /// Checks timing and scores.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the session ends before it
    /// starts or a score is outside `[0, 10]`.
    pub fn validate(&self) -> Result<()> {
        if self.ended_at < self.started_at {
            return Err(ReportError::InvalidData(
                "session ends before it starts".to_string(),
            ));
        }
        if let Some(bad) = self
            .problems
            .iter()
            .find(|p| !(0.0..=MAX_SCORE).contains(&p.score))
        {
            return Err(ReportError::InvalidData(format!(
                "score {} is outside 0-10",
                bad.score
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Report
// ============================================================================

/// A learner's progress report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    /// Who the report is for.
    pub learner: LearnerInfo,

    /// Aggregate figures.
    pub summary: ReportSummary,

    /// Completed problems, oldest first.
    pub problems: Vec<AttemptedProblem>,

    /// Remarks by frequency, most frequent first.
    pub recurring_remarks: Vec<RecurringRemark>,

    /// Prioritized suggestions for the next session.
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    /// Returns the most frequent remark, if any.
    #[must_use]
    pub fn top_remark(&self) -> Option<&RecurringRemark> {
        self.recurring_remarks.first()
    }
}

/// Learner and session identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerInfo {
    /// Learner id.
    pub learner_id: String,

    /// Subject id.
    pub subject_id: String,

    /// Session start.
    pub started_at: Option<DateTime<Utc>>,

    /// Session end.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Aggregate figures over the completed problems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of completed problems.
    pub problems_completed: usize,

    /// Mean score, absent when nothing was completed.
    pub average_score: Option<f64>,

    /// Highest score.
    pub best_score: Option<f64>,

    /// Lowest score.
    pub lowest_score: Option<f64>,

    /// Problems worked in Assist.
    pub assist_count: usize,

    /// Problems worked in Solo.
    pub solo_count: usize,

    /// Session length in seconds.
    pub duration_seconds: u64,
}

/// A remark and how often it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRemark {
    /// The remark as first seen.
    pub remark: String,

    /// Occurrences, compared case-insensitively.
    pub count: usize,
}

/// Score band used to pick recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    /// Average below 5.
    Struggling,
    /// Average from 5 up to 8.
    Developing,
    /// Average 8 or above.
    Proficient,
}

impl ScoreBand {
    /// Classifies an average score.
    #[must_use]
    pub fn from_average(average: f64) -> Self {
        if average < 5.0 {
            Self::Struggling
        } else if average < 8.0 {
            Self::Developing
        } else {
            Self::Proficient
        }
    }
}

/// A prioritized suggestion for the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Priority of this recommendation (1 = highest priority).
    pub priority: u32,

    /// Category, e.g. "fundamentals", "recurring", "challenge".
    pub category: String,

    /// What to do next.
    pub description: String,
}

impl Recommendation {
    /// Creates a new recommendation.
    #[must_use]
    pub fn new(priority: u32, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            priority,
            category: category.into(),
            description: description.into(),
        }
    }
}

// ============================================================================
// ReportGenerator
// ============================================================================

/// Derives a [`Report`] from a [`ReportInput`].
pub struct ReportGenerator<'a> {
    input: &'a ReportInput,
}

impl<'a> ReportGenerator<'a> {
    /// Creates a generator for the given input.
    #[must_use]
    pub const fn new(input: &'a ReportInput) -> Self {
        Self { input }
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the input fails validation.
    pub fn generate(&self) -> Result<Report> {
        self.input.validate()?;
        let summary = self.summary();
        let recurring_remarks = self.recurring_remarks();
        let recommendations = recommendations(&summary, recurring_remarks.first());
        Ok(Report {
            learner: LearnerInfo {
                learner_id: self.input.learner_id.clone(),
                subject_id: self.input.subject_id.clone(),
                started_at: Some(self.input.started_at),
                ended_at: Some(self.input.ended_at),
            },
            summary,
            problems: self.input.problems.clone(),
            recurring_remarks,
            recommendations,
        })
    }

    fn summary(&self) -> ReportSummary {
        let problems = &self.input.problems;
        let scores = problems.iter().map(|p| p.score);
        let count = problems.len();
        let average_score = (count > 0).then(|| {
            #[allow(clippy::cast_precision_loss)]
            let n = count as f64;
            scores.clone().sum::<f64>() / n
        });
        let duration_seconds = u64::try_from(
            (self.input.ended_at - self.input.started_at).num_seconds(),
        )
        .unwrap_or(0);

        ReportSummary {
            problems_completed: count,
            average_score,
            best_score: scores.clone().reduce(f64::max),
            lowest_score: scores.reduce(f64::min),
            assist_count: problems
                .iter()
                .filter(|p| p.mode == PracticeMode::Assist)
                .count(),
            solo_count: problems
                .iter()
                .filter(|p| p.mode == PracticeMode::Solo)
                .count(),
            duration_seconds,
        }
    }

    fn recurring_remarks(&self) -> Vec<RecurringRemark> {
        let mut order: Vec<RecurringRemark> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for remark in self.input.problems.iter().flat_map(|p| &p.remarks) {
            let trimmed = remark.trim();
            if trimmed.is_empty() {
                continue;
            }
            let key = trimmed.to_lowercase();
            if let Some(&pos) = positions.get(&key) {
                order[pos].count += 1;
            } else {
                positions.insert(key, order.len());
                order.push(RecurringRemark {
                    remark: trimmed.to_string(),
                    count: 1,
                });
            }
        }

        // Stable: ties keep first-seen order
        order.sort_by(|a, b| b.count.cmp(&a.count));
        order
    }
}

fn recommendations(
    summary: &ReportSummary,
    top_remark: Option<&RecurringRemark>,
) -> Vec<Recommendation> {
    let Some(average) = summary.average_score else {
        return vec![Recommendation::new(
            1,
            "practice",
            "Complete a problem to receive recommendations",
        )];
    };

    let mut recs = Vec::new();
    match ScoreBand::from_average(average) {
        ScoreBand::Struggling => {
            recs.push(Recommendation::new(
                1,
                "fundamentals",
                "Average score is below 5. Revisit the fundamentals and work problems in Assist mode to follow the guided steps",
            ));
        }
        ScoreBand::Developing => {
            recs.push(Recommendation::new(
                2,
                "practice",
                "Keep practising at this level and review the remarks before each new problem",
            ));
        }
        ScoreBand::Proficient => {
            let description = if summary.solo_count < summary.assist_count {
                "Scores are consistently high. Try more problems in Solo mode"
            } else {
                "Scores are consistently high. Move on to harder problems"
            };
            recs.push(Recommendation::new(3, "challenge", description));
        }
    }

    if let Some(remark) = top_remark.filter(|r| r.count > 1) {
        recs.push(Recommendation::new(
            1,
            "recurring",
            format!(
                "The same feedback came up {} times: \"{}\"",
                remark.count, remark.remark
            ),
        ));
    }

    recs.sort_by_key(|r| r.priority);
    recs
}

// ============================================================================
// Tests
// ============================================================================
