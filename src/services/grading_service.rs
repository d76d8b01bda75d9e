use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::GradedAnswer;
use crate::models::answer::StudentAnswer;
use crate::models::question::{Question, QuestionType};
use crate::models::test::TestQuestion;

/// Decides whether a given answer matches the stored key for one question type.
pub trait AnswerMatcher: Send + Sync {
    fn matches(&self, given: &str, expected: &str) -> bool;
}

/// Trimmed, case-insensitive equality.
pub struct ExactMatcher;

impl AnswerMatcher for ExactMatcher {
    fn matches(&self, given: &str, expected: &str) -> bool {
        let expected = expected.trim();
        !expected.is_empty() && given.trim().to_lowercase() == expected.to_lowercase()
    }
}

static EXACT: ExactMatcher = ExactMatcher;

pub fn matcher_for(question_type: QuestionType) -> &'static dyn AnswerMatcher {
    match question_type {
        QuestionType::Mcq | QuestionType::TrueFalse | QuestionType::McqWithAllOfAbove => &EXACT,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scorecard {
    pub obtained_marks: i32,
    pub total_marks: i32,
    pub percentage: Decimal,
    pub is_passed: bool,
    pub answers: Vec<GradedAnswer>,
}

pub struct GradingService;

impl GradingService {
    /// Scores a ledger against the test's slots. Only answers to questions that are part of
    /// the test can earn marks, and each correct one earns the slot's marks.
    pub fn score(
        answers: &[StudentAnswer],
        slots: &[TestQuestion],
        questions: &HashMap<Uuid, Question>,
        passing_marks: i32,
    ) -> Scorecard {
        let slot_marks: HashMap<Uuid, i32> =
            slots.iter().map(|s| (s.question_id, s.marks)).collect();
        let total_marks: i32 = slots.iter().map(|s| s.marks).sum();

        let mut obtained_marks = 0;
        let mut graded = Vec::with_capacity(answers.len());

        for answer in answers {
            let (is_correct, marks) = match (
                answer.given_answer(),
                questions.get(&answer.question_id),
                slot_marks.get(&answer.question_id),
            ) {
                (Some(given), Some(question), Some(&marks)) => {
                    if question.correct_answer.trim().is_empty() {
                        tracing::warn!(
                            question_id = %question.id,
                            "question has no correct answer configured; scoring as incorrect"
                        );
                    }
                    let correct =
                        matcher_for(question.question_type).matches(given, &question.correct_answer);
                    (correct, if correct { marks } else { 0 })
                }
                _ => (false, 0),
            };

            obtained_marks += marks;
            graded.push(GradedAnswer {
                answer_id: answer.id,
                is_correct,
                marks_obtained: marks,
            });
        }

        Scorecard {
            obtained_marks,
            total_marks,
            percentage: Self::percentage(obtained_marks, total_marks),
            is_passed: obtained_marks >= passing_marks,
            answers: graded,
        }
    }

    /// `obtained / total * 100` to two places; zero when there is nothing to score.
    pub fn percentage(obtained: i32, total: i32) -> Decimal {
        if total <= 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(obtained) * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(2)
    }
}
