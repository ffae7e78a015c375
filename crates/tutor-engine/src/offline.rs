//! Built-in problem bank used when the generation service is unavailable.
//!
//! `OfflineGateway` serves a few algebra problems with scripted guidance
//! steps. Answers are compared after normalisation, so `2x=8` and `2X = 8`
//! match.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Result, TutorError};
use crate::gateway::TutorGateway;
use crate::session::{ConversationStep, PastProblem, DEFAULT_LEVEL, MAX_SCORE};
use crate::step::StepResult;
use crate::wire::{CreatedSubject, GeneratedProblem, Grade, NewSubject, Subject};

/// Subject id of the built-in bank.
pub const OFFLINE_SUBJECT_ID: &str = "offline-algebra";

/// Score for a solo answer that does not match.
const MISMATCH_SCORE: f64 = 4.0;

struct ScriptedStep {
    prompt: &'static str,
    accepted: &'static [&'static str],
    hint: &'static str,
}

struct BankProblem {
    question: &'static str,
    steps: &'static [ScriptedStep],
}

static BANK: &[BankProblem] = &[
    BankProblem {
        question: "Solve for x: 2x + 5 = 13",
        steps: &[
            ScriptedStep {
                prompt: "Let's start by isolating the term with x. What do you get when you subtract 5 from both sides?",
                accepted: &["2x = 8"],
                hint: "Subtract 5 from both sides. What's 13 - 5?",
            },
            ScriptedStep {
                prompt: "Now divide both sides by 2 to solve for x. What is x equal to?",
                accepted: &["x = 4", "4"],
                hint: "Divide both sides by 2. What's 8 / 2?",
            },
            ScriptedStep {
                prompt: "Check the answer. Substitute x = 4 into 2x + 5 = 13. What do you get?",
                accepted: &["2(4) + 5 = 13", "8 + 5 = 13", "13 = 13", "x = 4"],
                hint: "Replace x with 4: 2(4) + 5 = ?",
            },
        ],
    },
    BankProblem {
        question: "Simplify: 3(x + 4) - 2x",
        steps: &[
            ScriptedStep {
                prompt: "First distribute the 3 over both terms inside the parentheses. What do you get?",
                accepted: &["3x + 12 - 2x"],
                hint: "Multiply 3 by each term: 3 * x and 3 * 4.",
            },
            ScriptedStep {
                prompt: "Now combine the like terms. What's the simplified expression?",
                accepted: &["x + 12", "12 + x"],
                hint: "Combine the x terms: 3x - 2x = ?",
            },
        ],
    },
    BankProblem {
        question: "Solve for y: 4y - 7 = 2y + 9",
        steps: &[
            ScriptedStep {
                prompt: "Get all the y terms on one side. Subtract 2y from both sides. What do you get?",
                accepted: &["2y - 7 = 9"],
                hint: "Subtract 2y from the left side: 4y - 2y = ?",
            },
            ScriptedStep {
                prompt: "Now add 7 to both sides to isolate the term with y. What do you get?",
                accepted: &["2y = 16"],
                hint: "Add 7 to both sides. What's 9 + 7?",
            },
            ScriptedStep {
                prompt: "Finally divide both sides by 2. What is y?",
                accepted: &["y = 8", "8"],
                hint: "Divide both sides by 2. What's 16 / 2?",
            },
        ],
    },
];

static DISALLOWED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^\w\s\-+*/()=.]").ok());
static OPERATOR_SPACING: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s*([=+\-*/])\s*").ok());

/// Normalises an answer for comparison.
///
/// Lower-cases, collapses whitespace, drops characters that are not word
/// characters or basic math symbols, and removes spacing around `= + - * /`.
#[must_use]
pub fn normalize_answer(answer: &str) -> String {
    let collapsed = answer
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = DISALLOWED
        .as_ref()
        .map_or_else(|| collapsed.clone(), |re| re.replace_all(&collapsed, "").into_owned());
    OPERATOR_SPACING
        .as_ref()
        .map_or_else(|| cleaned.clone(), |re| re.replace_all(&cleaned, "$1").into_owned())
}

/// Returns `true` if `answer` matches any accepted answer after normalisation.
#[must_use]
pub fn answer_matches(answer: &str, accepted: &[&str]) -> bool {
    let answer = normalize_answer(answer);
    accepted.iter().any(|a| normalize_answer(a) == answer)
}

fn find(problem_text: &str) -> Result<&'static BankProblem> {
    BANK.iter()
        .find(|p| p.question == problem_text)
        .ok_or_else(|| TutorError::api(404, "this problem is not available offline"))
}

/// Gateway over the built-in problem bank.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

impl OfflineGateway {
    /// Creates the offline gateway.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn grade(problem: &BankProblem, answer: &str) -> Grade {
        let accepted = problem.steps.last().map_or(&[][..], |s| s.accepted);
        if answer_matches(answer, accepted) {
            Grade {
                marks: MAX_SCORE,
                correction: None,
                remarks: Vec::new(),
            }
        } else {
            Grade {
                marks: MISMATCH_SCORE,
                correction: accepted.first().map(|a| (*a).to_string()),
                remarks: vec!["Final answer does not match the expected result".to_string()],
            }
        }
    }

    fn score_transcript(problem: &BankProblem, transcript: &[ConversationStep]) -> StepResult {
        let mut remarks = Vec::new();
        let mut correct = 0_u32;
        for (step, scripted) in transcript.iter().zip(problem.steps) {
            if answer_matches(&step.student_answer, scripted.accepted) {
                correct += 1;
            } else {
                remarks.push(format!("Step {}: {}", step.index, scripted.hint));
            }
        }
        let total = u32::try_from(problem.steps.len()).unwrap_or(u32::MAX).max(1);
        let score = (MAX_SCORE * f64::from(correct) / f64::from(total)).round();
        StepResult::Complete {
            score,
            remarks,
            tip: (correct < total).then(|| "Review the hinted steps and try a similar problem".to_string()),
        }
    }
}

#[async_trait]
impl TutorGateway for OfflineGateway {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn generate_problem(
        &self,
        _user_id: &str,
        _subject_id: &str,
        recent: Option<&PastProblem>,
    ) -> Result<GeneratedProblem> {
        let next = recent
            .and_then(|past| BANK.iter().position(|p| p.question == past.problem_text))
            .map_or(0, |i| (i + 1) % BANK.len());
        let problem = BANK
            .get(next)
            .ok_or_else(|| TutorError::api(404, "offline problem bank is empty"))?;
        debug!(index = next, "Serving offline problem");
        Ok(GeneratedProblem {
            problem_text: problem.question.to_string(),
            level: DEFAULT_LEVEL,
        })
    }

    async fn next_step(
        &self,
        problem_text: &str,
        transcript: &[ConversationStep],
        student_answer: Option<&str>,
    ) -> Result<StepResult> {
        let problem = find(problem_text)?;
        if let Some(answer) = student_answer {
            let grade = Self::grade(problem, answer);
            return Ok(StepResult::Complete {
                score: grade.marks,
                remarks: grade.remarks,
                tip: grade.correction.map(|c| format!("Expected: {c}")),
            });
        }
        match problem.steps.get(transcript.len()) {
            Some(step) => Ok(StepResult::Continue {
                step_index: u32::try_from(transcript.len() + 1)
                    .map_err(|_| TutorError::protocol("transcript too long"))?,
                prompt: step.prompt.to_string(),
            }),
            None => Ok(Self::score_transcript(problem, transcript)),
        }
    }

    async fn grade_answer(&self, problem_text: &str, answer: &str) -> Result<Grade> {
        Ok(Self::grade(find(problem_text)?, answer))
    }

    async fn list_subjects(&self, _user_id: &str) -> Result<Vec<Subject>> {
        Ok(vec![Subject {
            subject_id: OFFLINE_SUBJECT_ID.to_string(),
            display_name: "Algebra (offline)".to_string(),
            subject: "math".to_string(),
            description: "Built-in linear equations and simplification".to_string(),
            curriculum_concepts: vec![
                "linear equations".to_string(),
                "distribution".to_string(),
                "like terms".to_string(),
            ],
        }])
    }

    async fn create_subject(&self, _subject: &NewSubject) -> Result<CreatedSubject> {
        Err(TutorError::api(501, "subjects cannot be created offline"))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
