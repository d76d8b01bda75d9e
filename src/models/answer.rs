use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "answer_status", rename_all = "snake_case")]
pub enum AnswerStatus {
    Unvisited,
    Visited,
    Answered,
    MarkedForReview,
}

impl AnswerStatus {
    pub fn for_answer(answer_text: Option<&str>, marked_for_review: bool) -> Self {
        match answer_text {
            Some(text) if !text.trim().is_empty() => {
                if marked_for_review {
                    AnswerStatus::MarkedForReview
                } else {
                    AnswerStatus::Answered
                }
            }
            _ => AnswerStatus::Visited,
        }
    }

    /// `Unvisited -> Visited`; every other status is kept.
    pub fn visited(self) -> Self {
        match self {
            AnswerStatus::Unvisited => AnswerStatus::Visited,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentAnswer {
    pub id: Uuid,
    pub result_id: Uuid,
    pub question_id: Uuid,
    pub answer_text: Option<String>,
    pub is_correct: bool,
    pub marks_obtained: i32,
    pub status: AnswerStatus,
    pub is_marked_for_review: bool,
    pub answered_at: Option<DateTime<Utc>>,
}

impl StudentAnswer {
    pub fn unvisited(result_id: Uuid, question_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            result_id,
            question_id,
            answer_text: None,
            is_correct: false,
            marks_obtained: 0,
            status: AnswerStatus::Unvisited,
            is_marked_for_review: false,
            answered_at: None,
        }
    }

    /// Trimmed answer text, `None` when blank.
    pub fn given_answer(&self) -> Option<&str> {
        self.answer_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_answer_only_counts_as_visited() {
        assert_eq!(AnswerStatus::for_answer(None, true), AnswerStatus::Visited);
        assert_eq!(AnswerStatus::for_answer(Some("   "), false), AnswerStatus::Visited);
        assert_eq!(AnswerStatus::for_answer(Some("B"), false), AnswerStatus::Answered);
        assert_eq!(AnswerStatus::for_answer(Some("B"), true), AnswerStatus::MarkedForReview);
    }

    #[test]
    fn visiting_never_downgrades() {
        assert_eq!(AnswerStatus::Unvisited.visited(), AnswerStatus::Visited);
        assert_eq!(AnswerStatus::Visited.visited(), AnswerStatus::Visited);
        assert_eq!(AnswerStatus::Answered.visited(), AnswerStatus::Answered);
        assert_eq!(AnswerStatus::MarkedForReview.visited(), AnswerStatus::MarkedForReview);
    }
}
