//! Markdown progress report output.
//!
//! [`MarkdownGenerator`] renders a [`Report`] as:
//!
//! - A summary table with key figures
//! - One section per completed problem
//! - Recurring remarks by frequency
//! - Prioritized recommendations
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{MarkdownGenerator, Report};
//!
//! let report = Report::default();
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Tutor Progress Report"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{AttemptedProblem, Report, MAX_SCORE};

/// Generates Markdown progress reports.
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_problems(&mut output);
        self.write_recurring_remarks(&mut output);
        self.write_recommendations(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let learner = &self.report.learner.learner_id;
        if learner.is_empty() {
            let _ = writeln!(output, "# Tutor Progress Report\n");
        } else {
            let _ = writeln!(output, "# Tutor Progress Report: {}\n", escape_markdown(learner));
        }
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(
            output,
            "| Subject | {} |",
            escape_markdown(&self.report.learner.subject_id)
        );
        let _ = writeln!(output, "| Problems Completed | {} |", summary.problems_completed);
        let _ = writeln!(output, "| Average Score | {} |", format_optional_score(summary.average_score));
        let _ = writeln!(output, "| Best Score | {} |", format_optional_score(summary.best_score));
        let _ = writeln!(output, "| Lowest Score | {} |", format_optional_score(summary.lowest_score));
        let _ = writeln!(
            output,
            "| Modes | {} assist, {} solo |",
            summary.assist_count, summary.solo_count
        );
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds)
        );
        let _ = writeln!(output);
    }

    fn write_problems(&self, output: &mut String) {
        let _ = writeln!(output, "## Problems\n");

        if self.report.problems.is_empty() {
            let _ = writeln!(output, "*No problems completed.*\n");
            return;
        }

        for (index, problem) in self.report.problems.iter().enumerate() {
            Self::write_problem(output, index + 1, problem);
        }
    }

    fn write_problem(output: &mut String, number: usize, problem: &AttemptedProblem) {
        let _ = writeln!(
            output,
            "### Problem {number}: {}\n",
            escape_markdown(&problem.problem_text)
        );
        let _ = writeln!(
            output,
            "**Score**: {} | **Level**: {} | **Mode**: {} | **Completed**: {}\n",
            format_score(problem.score),
            problem.level,
            problem.mode,
            format_timestamp(&problem.completed_at)
        );

        if problem.remarks.is_empty() {
            let _ = writeln!(output, "*No remarks.*\n");
            return;
        }
        for remark in &problem.remarks {
            let _ = writeln!(output, "- {}", escape_markdown(remark));
        }
        let _ = writeln!(output);
    }

    fn write_recurring_remarks(&self, output: &mut String) {
        let _ = writeln!(output, "## Recurring Remarks\n");

        if self.report.recurring_remarks.is_empty() {
            let _ = writeln!(output, "*No remarks recorded.*\n");
            return;
        }

        let _ = writeln!(output, "| Remark | Count |");
        let _ = writeln!(output, "|--------|-------|");
        for entry in &self.report.recurring_remarks {
            let _ = writeln!(output, "| {} | {} |", escape_markdown(&entry.remark), entry.count);
        }
        let _ = writeln!(output);
    }

    fn write_recommendations(&self, output: &mut String) {
        let _ = writeln!(output, "## Recommendations\n");

        if self.report.recommendations.is_empty() {
            let _ = writeln!(output, "*No specific recommendations.*\n");
            return;
        }

        let mut sorted_recs: Vec<_> = self.report.recommendations.iter().collect();
        sorted_recs.sort_by_key(|r| r.priority);

        for (index, rec) in sorted_recs.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. **[{}]** {}",
                index + 1,
                escape_markdown(&rec.category),
                escape_markdown(&rec.description),
            );
        }

        let _ = writeln!(output);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let generated = format_timestamp(&Utc::now());
        let subject = &self.report.learner.subject_id;
        if subject.is_empty() {
            let _ = writeln!(output, "*Generated by tutor at {generated}*");
        } else {
            let _ = writeln!(
                output,
                "*Generated by tutor at {generated} for {}*",
                escape_markdown(subject)
            );
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Characters that would otherwise turn problem text or grader remarks into
/// formatting, links or table columns.
const MARKDOWN_SPECIALS: &[char] = &[
    '*', '_', '`', '#', '[', ']', '(', ')', '!', '\\', '<', '>', '|',
];

/// Session length for the summary table, largest unit first with zero
/// units dropped (`332` renders as `5m 32s`).
fn format_duration(seconds: u64) -> String {
    let units = [(seconds / 3600, 'h'), ((seconds % 3600) / 60, 'm'), (seconds % 60, 's')];
    let rendered: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    if rendered.is_empty() {
        "0s".to_string()
    } else {
        rendered.join(" ")
    }
}

/// Completion and generation times, always in UTC.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_score(score: f64) -> String {
    format!("{score:.1}/{MAX_SCORE:.0}")
}

fn format_optional_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), format_score)
}

/// Makes problem statements and remarks render literally. Newlines become
/// `<br>` so a multi-line remark stays inside its table row.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\n' {
            result.push_str("<br>");
            continue;
        }
        if MARKDOWN_SPECIALS.contains(&ch) {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
