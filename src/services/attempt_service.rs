use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use uuid::Uuid;

use crate::database::{ExamStore, PendingSubmission};
use crate::error::{Error, Result};
use crate::models::allocation::TestAllocation;
use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::question::{Question, QuestionType};
use crate::models::test::{Test, TestQuestion};
use crate::models::test_attempt::{AttemptStatus, SubmitCause, TestAttempt};
use crate::models::test_result::TestResult;
use crate::services::answer_service::AnswerService;
use crate::services::grading_service::GradingService;
use crate::services::projection_service::{ProjectionService, ResultBreakdown};
use crate::utils::time::Clock;

/// Instructions become readable this long before the window opens.
const INSTRUCTIONS_LEAD_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct QuestionOption {
    pub key: String,
    pub text: String,
}

/// One question as shown while the attempt is running. Never carries the key.
#[derive(Debug, Clone, Serialize)]
pub struct SessionQuestion {
    pub number: usize,
    pub question_id: Uuid,
    pub question_type: QuestionType,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub marks: i32,
    pub status: AnswerStatus,
    pub answer_text: Option<String>,
    pub is_marked_for_review: bool,
}

#[derive(Debug, Clone)]
pub struct TestSession {
    pub attempt: TestAttempt,
    pub test: Test,
    pub result_id: Uuid,
    pub seconds_remaining: i64,
    pub questions: Vec<SessionQuestion>,
}

#[derive(Debug, Clone)]
pub enum AttemptView {
    InProgress(TestSession),
    /// Already submitted, either before this call or by the expiry check it ran.
    Finished(TestAttempt),
}

#[derive(Debug, Clone)]
pub struct InstructionsView {
    pub allocation: TestAllocation,
    pub test: Test,
    pub question_count: usize,
    pub total_marks: i32,
    pub can_start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewQuestion {
    pub number: usize,
    pub question_id: Uuid,
    pub question_type: QuestionType,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub marks: i32,
    pub answer_text: Option<String>,
    pub is_correct: bool,
    pub marks_obtained: i32,
    pub status: AnswerStatus,
    pub correct_answer: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReviewView {
    pub attempt: TestAttempt,
    pub test: Test,
    pub result: TestResult,
    pub questions: Vec<ReviewQuestion>,
    pub breakdown: ResultBreakdown,
}

#[derive(Debug, Clone)]
pub struct DashboardEntry {
    pub allocation: TestAllocation,
    pub test_title: String,
    pub duration_minutes: i32,
    pub attempt: Option<TestAttempt>,
}

#[derive(Debug, Clone)]
pub struct CompletedEntry {
    pub result: TestResult,
    pub test_title: String,
}

#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    pub upcoming: Vec<DashboardEntry>,
    pub in_progress: Vec<DashboardEntry>,
    pub completed: Vec<CompletedEntry>,
}

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
    ledger: AnswerService,
    projection: ProjectionService,
}

impl AttemptService {
    pub fn new(store: Arc<dyn ExamStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: AnswerService::new(store.clone(), clock.clone()),
            projection: ProjectionService::new(store.clone()),
            store,
            clock,
        }
    }

    /// Starts or resumes the caller's attempt on an allocation.
    pub async fn start_attempt(&self, allocation_id: Uuid, student_id: Uuid) -> Result<TestAttempt> {
        let now = self.clock.now();
        let allocation = self.owned_allocation(allocation_id, student_id).await?;

        if !allocation.has_started(now) {
            return Err(Error::WindowNotOpen);
        }

        let existing = self.store.find_attempt(allocation.id, student_id).await?;
        if existing.as_ref().is_some_and(TestAttempt::is_submitted) {
            return Err(Error::AlreadySubmitted);
        }
        if let Some(result) = self.store.find_result(allocation.test_id, student_id).await? {
            if result.is_final() {
                return Err(Error::AlreadySubmitted);
            }
        }

        let test = self.load_test(allocation.test_id).await?;
        if allocation.has_ended(now) && !test.allow_late_submission {
            return Err(Error::WindowClosed);
        }

        if let Some(attempt) = existing {
            tracing::debug!(attempt_id = %attempt.id, "resuming attempt");
            return Ok(attempt);
        }

        // Attempts on other allocations of the same test share one result.
        let elsewhere = self
            .store
            .list_attempts_for_student(student_id)
            .await?
            .into_iter()
            .find(|a| {
                a.test_id == test.id && a.allocation_id != allocation.id && !a.is_submitted()
            });
        if let Some(other) = elsewhere {
            let other = self.expire_if_due(other, &test).await?;
            if other.is_submitted() {
                return Err(Error::AlreadySubmitted);
            }
            tracing::info!(
                attempt_id = %other.id,
                allocation_id = %allocation.id,
                "test already running on another allocation"
            );
            return Err(Error::AttemptInProgress);
        }

        let shuffled_order = if test.shuffle_questions {
            let slots = self.store.list_test_questions(test.id).await?;
            Some(shuffled_question_ids(&slots))
        } else {
            None
        };

        let attempt = self
            .store
            .insert_attempt(&TestAttempt::begin(
                allocation.id,
                student_id,
                test.id,
                now,
                shuffled_order,
            ))
            .await?;

        tracing::info!(
            attempt_id = %attempt.id,
            allocation_id = %allocation.id,
            student_id = %student_id,
            "attempt started"
        );
        Ok(attempt)
    }

    pub async fn instructions(&self, allocation_id: Uuid, student_id: Uuid) -> Result<InstructionsView> {
        let now = self.clock.now();
        let allocation = self.owned_allocation(allocation_id, student_id).await?;

        if now < allocation.scheduled_start_time - Duration::minutes(INSTRUCTIONS_LEAD_MINUTES) {
            return Err(Error::WindowNotOpen);
        }
        if allocation.is_completed {
            return Err(Error::AlreadySubmitted);
        }

        let test = self.load_test(allocation.test_id).await?;
        if allocation.has_ended(now) && !test.allow_late_submission {
            return Err(Error::WindowClosed);
        }

        let slots = self.store.list_test_questions(test.id).await?;
        Ok(InstructionsView {
            can_start: allocation.has_started(now),
            question_count: slots.len(),
            total_marks: slots.iter().map(|s| s.marks).sum(),
            allocation,
            test,
        })
    }

    /// Loads the take-test view. An attempt past its duration is submitted here before
    /// anything is returned.
    pub async fn open_attempt(&self, attempt_id: Uuid, student_id: Uuid) -> Result<AttemptView> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        let test = self.load_test(attempt.test_id).await?;
        let attempt = self.expire_if_due(attempt, &test).await?;
        if attempt.is_submitted() {
            return Ok(AttemptView::Finished(attempt));
        }

        let slots = self.store.list_test_questions(test.id).await?;
        let result = self.ledger.ensure_ledger(&attempt, &slots).await?;
        let answers = answers_by_question(self.store.list_answers(&[result.id]).await?);
        let questions = self.question_map(&slots).await?;

        let ordered = presentation_order(&slots, attempt.shuffled_order.as_deref());
        let mut view = Vec::with_capacity(ordered.len());
        for slot in ordered {
            let Some(question) = questions.get(&slot.question_id) else {
                tracing::warn!(question_id = %slot.question_id, "test slot references a missing question");
                continue;
            };
            let answer = answers.get(&slot.question_id);
            view.push(SessionQuestion {
                number: view.len() + 1,
                question_id: question.id,
                question_type: question.question_type,
                question_text: question.question_text.clone(),
                options: options_of(question),
                marks: slot.marks,
                status: answer.map_or(AnswerStatus::Unvisited, |a| a.status),
                answer_text: answer.and_then(|a| a.answer_text.clone()),
                is_marked_for_review: answer.is_some_and(|a| a.is_marked_for_review),
            });
        }

        Ok(AttemptView::InProgress(TestSession {
            seconds_remaining: attempt.seconds_remaining(test.duration_minutes, self.clock.now()),
            result_id: result.id,
            questions: view,
            attempt,
            test,
        }))
    }

    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        question_id: Uuid,
        answer_text: Option<String>,
        marked_for_review: bool,
    ) -> Result<StudentAnswer> {
        let (attempt, slots) = self.running_attempt(attempt_id, student_id).await?;
        self.ledger
            .record_answer(&attempt, &slots, question_id, answer_text, marked_for_review)
            .await
    }

    pub async fn mark_visited(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        question_id: Uuid,
    ) -> Result<AnswerStatus> {
        let (attempt, slots) = self.running_attempt(attempt_id, student_id).await?;
        self.ledger.mark_visited(&attempt, &slots, question_id).await
    }

    /// Manual submission by the attempt's owner.
    pub async fn submit(&self, attempt_id: Uuid, student_id: Uuid) -> Result<TestResult> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        let test = self.load_test(attempt.test_id).await?;
        let cause = if attempt.is_expired(test.duration_minutes, self.clock.now()) {
            SubmitCause::TimeExpired
        } else {
            SubmitCause::Manual
        };
        self.finalize_loaded(&attempt, &test, cause).await
    }

    /// Scores and closes an attempt regardless of who asks. Fails with `AlreadySubmitted`
    /// once the attempt is closed; a stored score is never recomputed.
    pub async fn finalize(&self, attempt_id: Uuid, cause: SubmitCause) -> Result<TestResult> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or(Error::AttemptNotFound)?;
        let test = self.load_test(attempt.test_id).await?;
        self.finalize_loaded(&attempt, &test, cause).await
    }

    pub async fn review(&self, attempt_id: Uuid, student_id: Uuid) -> Result<ReviewView> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        let test = self.load_test(attempt.test_id).await?;
        let attempt = self.expire_if_due(attempt, &test).await?;
        if !attempt.is_submitted() {
            return Err(Error::AttemptInProgress);
        }

        let result = self
            .store
            .find_result(test.id, student_id)
            .await?
            .filter(TestResult::is_final)
            .ok_or(Error::ResultNotFound)?;

        let slots = self.store.list_test_questions(test.id).await?;
        let answers = answers_by_question(self.store.list_answers(&[result.id]).await?);
        let questions = self.question_map(&slots).await?;
        let reveal = test.show_results_immediately;

        let mut rows = Vec::new();
        for slot in presentation_order(&slots, attempt.shuffled_order.as_deref()) {
            let Some(question) = questions.get(&slot.question_id) else {
                continue;
            };
            let answer = answers.get(&slot.question_id);
            rows.push(ReviewQuestion {
                number: rows.len() + 1,
                question_id: question.id,
                question_type: question.question_type,
                question_text: question.question_text.clone(),
                options: options_of(question),
                marks: slot.marks,
                answer_text: answer.and_then(|a| a.answer_text.clone()),
                is_correct: answer.is_some_and(|a| a.is_correct),
                marks_obtained: answer.map_or(0, |a| a.marks_obtained),
                status: answer.map_or(AnswerStatus::Unvisited, |a| a.status),
                correct_answer: reveal.then(|| question.correct_answer.clone()),
                explanation: if reveal { question.explanation.clone() } else { None },
            });
        }

        let breakdown = self.projection.result_breakdown(&result).await?;
        Ok(ReviewView {
            attempt,
            test,
            result,
            questions: rows,
            breakdown,
        })
    }

    pub async fn dashboard(&self, student_id: Uuid) -> Result<Dashboard> {
        let now = self.clock.now();
        let allocations = self.store.list_allocations_for_student(student_id).await?;
        let attempts: HashMap<Uuid, TestAttempt> = self
            .store
            .list_attempts_for_student(student_id)
            .await?
            .into_iter()
            .map(|a| (a.allocation_id, a))
            .collect();
        let results: Vec<TestResult> = self
            .store
            .list_results_for_student(student_id)
            .await?
            .into_iter()
            .filter(TestResult::is_final)
            .collect();

        let test_ids: Vec<Uuid> = allocations
            .iter()
            .map(|a| a.test_id)
            .chain(results.iter().map(|r| r.test_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let tests: HashMap<Uuid, Test> = self
            .store
            .list_tests(&test_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let finished: HashSet<Uuid> = results.iter().map(|r| r.test_id).collect();

        let mut dashboard = Dashboard::default();
        for allocation in allocations {
            if allocation.is_completed {
                continue;
            }
            let Some(test) = tests.get(&allocation.test_id) else {
                continue;
            };
            let attempt = attempts.get(&allocation.id).cloned();
            let running = attempt.as_ref().is_some_and(|a| !a.is_submitted());
            if !running
                && (finished.contains(&test.id)
                    || (allocation.has_ended(now) && !test.allow_late_submission))
            {
                continue;
            }
            let entry = DashboardEntry {
                test_title: test.title.clone(),
                duration_minutes: test.duration_minutes,
                allocation,
                attempt,
            };
            if running {
                dashboard.in_progress.push(entry);
            } else {
                dashboard.upcoming.push(entry);
            }
        }
        dashboard
            .upcoming
            .sort_by_key(|e| e.allocation.scheduled_start_time);

        for result in results {
            let test_title = tests
                .get(&result.test_id)
                .map(|t| t.title.clone())
                .unwrap_or_default();
            dashboard.completed.push(CompletedEntry { result, test_title });
        }
        dashboard
            .completed
            .sort_by(|a, b| b.result.submitted_at.cmp(&a.result.submitted_at));

        Ok(dashboard)
    }

    async fn finalize_loaded(
        &self,
        attempt: &TestAttempt,
        test: &Test,
        cause: SubmitCause,
    ) -> Result<TestResult> {
        if attempt.is_submitted() {
            return Err(Error::AlreadySubmitted);
        }

        let slots = self.store.list_test_questions(test.id).await?;
        let result = self.ledger.ensure_ledger(attempt, &slots).await?;
        let questions = self.question_map(&slots).await?;
        let grade = |answers: &[StudentAnswer]| {
            GradingService::score(answers, &slots, &questions, test.passing_marks)
        };

        let submitted_at = self.clock.now();
        let pending = PendingSubmission {
            attempt_id: attempt.id,
            allocation_id: attempt.allocation_id,
            result_id: result.id,
            cause,
            submitted_at,
            time_taken_minutes: minutes_between(attempt.started_at, submitted_at),
        };

        let Some(finalized) = self.store.finalize_submission(&pending, &grade).await? else {
            if result.is_final() {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    result_id = %result.id,
                    "result was already final; attempt closed without scoring"
                );
            } else {
                tracing::warn!(attempt_id = %attempt.id, "attempt was submitted concurrently");
            }
            return Err(Error::AlreadySubmitted);
        };

        tracing::info!(
            attempt_id = %attempt.id,
            cause = ?cause,
            obtained = finalized.obtained_marks,
            total = finalized.total_marks,
            passed = finalized.is_passed,
            "attempt submitted"
        );
        Ok(finalized)
    }

    /// Runs the expiry check and returns the attempt as it is afterwards.
    async fn expire_if_due(&self, attempt: TestAttempt, test: &Test) -> Result<TestAttempt> {
        if attempt.status != AttemptStatus::InProgress
            || !attempt.is_expired(test.duration_minutes, self.clock.now())
        {
            return Ok(attempt);
        }

        match self
            .finalize_loaded(&attempt, test, SubmitCause::TimeExpired)
            .await
        {
            Ok(_) | Err(Error::AlreadySubmitted) => {}
            Err(e) => return Err(e),
        }
        self.store
            .get_attempt(attempt.id)
            .await?
            .ok_or(Error::AttemptNotFound)
    }

    /// Attempt that still accepts answers, plus the test's slots.
    async fn running_attempt(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
    ) -> Result<(TestAttempt, Vec<TestQuestion>)> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        let test = self.load_test(attempt.test_id).await?;
        let attempt = self.expire_if_due(attempt, &test).await?;
        if attempt.is_submitted() {
            return Err(Error::AlreadySubmitted);
        }
        let slots = self.store.list_test_questions(test.id).await?;
        Ok((attempt, slots))
    }

    async fn owned_allocation(&self, allocation_id: Uuid, student_id: Uuid) -> Result<TestAllocation> {
        self.store
            .get_allocation(allocation_id)
            .await?
            .filter(|a| a.student_id == student_id)
            .ok_or(Error::NotAllocated)
    }

    async fn owned_attempt(&self, attempt_id: Uuid, student_id: Uuid) -> Result<TestAttempt> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .filter(|a| a.student_id == student_id)
            .ok_or(Error::AttemptNotFound)
    }

    async fn load_test(&self, test_id: Uuid) -> Result<Test> {
        self.store
            .get_test(test_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
    }

    async fn question_map(&self, slots: &[TestQuestion]) -> Result<HashMap<Uuid, Question>> {
        let ids: Vec<Uuid> = slots.iter().map(|s| s.question_id).collect();
        Ok(self
            .store
            .list_questions(&ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect())
    }
}

fn shuffled_question_ids(slots: &[TestQuestion]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = slots.iter().map(|s| s.question_id).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}

/// Slots in the attempt's stored order. Ids no longer in the test are skipped and slots
/// added after the attempt started follow in natural order.
pub fn presentation_order<'a>(
    slots: &'a [TestQuestion],
    shuffled: Option<&[Uuid]>,
) -> Vec<&'a TestQuestion> {
    let Some(shuffled) = shuffled else {
        return slots.iter().collect();
    };

    let by_question: HashMap<Uuid, &TestQuestion> =
        slots.iter().map(|s| (s.question_id, s)).collect();
    let mut seen = HashSet::new();
    let mut ordered: Vec<&TestQuestion> = shuffled
        .iter()
        .filter_map(|id| by_question.get(id).copied())
        .filter(|s| seen.insert(s.question_id))
        .collect();
    ordered.extend(slots.iter().filter(|s| !seen.contains(&s.question_id)));
    ordered
}

fn answers_by_question(answers: Vec<StudentAnswer>) -> HashMap<Uuid, StudentAnswer> {
    answers.into_iter().map(|a| (a.question_id, a)).collect()
}

fn options_of(question: &Question) -> Vec<QuestionOption> {
    question
        .options()
        .into_iter()
        .map(|(key, text)| QuestionOption {
            key: key.to_string(),
            text: text.to_string(),
        })
        .collect()
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    i32::try_from((to - from).num_minutes().max(0)).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(n: usize) -> Vec<TestQuestion> {
        let test_id = Uuid::new_v4();
        (0..n)
            .map(|i| TestQuestion {
                id: Uuid::new_v4(),
                test_id,
                question_id: Uuid::new_v4(),
                question_order: i as i32,
                marks: 1,
            })
            .collect()
    }

    #[test]
    fn natural_order_without_shuffle() {
        let slots = slots(3);
        let ordered = presentation_order(&slots, None);
        let ids: Vec<Uuid> = ordered.iter().map(|s| s.question_id).collect();
        let expected: Vec<Uuid> = slots.iter().map(|s| s.question_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn stored_order_skips_removed_and_appends_new() {
        let slots = slots(4);
        let removed = Uuid::new_v4();
        let stored = vec![slots[2].question_id, removed, slots[0].question_id];

        let ids: Vec<Uuid> = presentation_order(&slots, Some(&stored))
            .iter()
            .map(|s| s.question_id)
            .collect();
        assert_eq!(
            ids,
            vec![
                slots[2].question_id,
                slots[0].question_id,
                slots[1].question_id,
                slots[3].question_id,
            ]
        );
    }

    #[test]
    fn shuffled_ids_are_a_permutation() {
        let slots = slots(8);
        let mut shuffled = shuffled_question_ids(&slots);
        let mut natural: Vec<Uuid> = slots.iter().map(|s| s.question_id).collect();
        shuffled.sort();
        natural.sort();
        assert_eq!(shuffled, natural);
    }

    #[test]
    fn elapsed_minutes_truncate() {
        let start = Utc::now();
        assert_eq!(minutes_between(start, start + Duration::seconds(119)), 1);
        assert_eq!(minutes_between(start, start - Duration::seconds(5)), 0);
    }
}
