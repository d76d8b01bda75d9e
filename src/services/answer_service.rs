use std::sync::Arc;

use uuid::Uuid;

use crate::database::ExamStore;
use crate::error::{Error, Result};
use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::test::TestQuestion;
use crate::models::test_attempt::TestAttempt;
use crate::models::test_result::TestResult;
use crate::utils::time::Clock;

/// Per-question response records of one result. Callers pass an attempt that has already
/// been checked to be in progress.
#[derive(Clone)]
pub struct AnswerService {
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
}

impl AnswerService {
    pub fn new(store: Arc<dyn ExamStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates the result and one `Unvisited` row per test question if they are missing.
    pub async fn ensure_ledger(
        &self,
        attempt: &TestAttempt,
        slots: &[TestQuestion],
    ) -> Result<TestResult> {
        let result = match self.store.find_result(attempt.test_id, attempt.student_id).await? {
            Some(result) => result,
            None => {
                let opened = TestResult::open(
                    attempt.id,
                    attempt.test_id,
                    attempt.student_id,
                    attempt.started_at,
                );
                let stored = self.store.insert_result(&opened).await?;
                tracing::debug!(result_id = %stored.id, attempt_id = %attempt.id, "result opened");
                stored
            }
        };

        if !result.is_final() {
            let question_ids: Vec<Uuid> = slots.iter().map(|s| s.question_id).collect();
            self.store
                .insert_missing_answers(result.id, &question_ids)
                .await?;
        }
        Ok(result)
    }

    pub async fn record_answer(
        &self,
        attempt: &TestAttempt,
        slots: &[TestQuestion],
        question_id: Uuid,
        answer_text: Option<String>,
        marked_for_review: bool,
    ) -> Result<StudentAnswer> {
        if !slots.iter().any(|s| s.question_id == question_id) {
            return Err(Error::QuestionNotInTest);
        }
        let result = self.ensure_ledger(attempt, slots).await?;
        if result.is_final() {
            return Err(Error::AlreadySubmitted);
        }

        let now = self.clock.now();
        let answer_text = answer_text.filter(|text| !text.trim().is_empty());
        let status = AnswerStatus::for_answer(answer_text.as_deref(), marked_for_review);
        let row = StudentAnswer {
            answer_text,
            status,
            is_marked_for_review: marked_for_review,
            answered_at: Some(now),
            ..StudentAnswer::unvisited(result.id, question_id)
        };

        let stored = self
            .store
            .upsert_answer(attempt.id, &row)
            .await?
            .ok_or(Error::AlreadySubmitted)?;
        self.store.touch_attempt(attempt.id, now).await?;

        tracing::debug!(
            attempt_id = %attempt.id,
            question_id = %question_id,
            status = ?stored.status,
            "answer saved"
        );
        Ok(stored)
    }

    pub async fn mark_visited(
        &self,
        attempt: &TestAttempt,
        slots: &[TestQuestion],
        question_id: Uuid,
    ) -> Result<AnswerStatus> {
        if !slots.iter().any(|s| s.question_id == question_id) {
            return Err(Error::QuestionNotInTest);
        }
        let result = self.ensure_ledger(attempt, slots).await?;
        self.store
            .mark_visited(result.id, question_id)
            .await?
            .ok_or_else(|| Error::Internal("answer row missing after ledger init".to_string()))
    }
}
