#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod pg_store;
pub mod pool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::allocation::{TestAllocation, TestSchedule};
use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::question::{Question, Subject, Topic};
use crate::models::test::{Test, TestQuestion};
use crate::models::test_attempt::{SubmitCause, TestAttempt};
use crate::models::test_result::TestResult;
use crate::services::grading_service::Scorecard;

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;
pub use pg_store::PgStore;

/// Per-answer outcome frozen at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedAnswer {
    pub answer_id: Uuid,
    pub is_correct: bool,
    pub marks_obtained: i32,
}

/// The parts of a submission known before the ledger is read.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub attempt_id: Uuid,
    pub allocation_id: Uuid,
    pub result_id: Uuid,
    pub cause: SubmitCause,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_minutes: i32,
}

/// Scores the ledger rows read after the attempt has been locked for submission.
pub type Grader<'a> = dyn Fn(&[StudentAnswer]) -> Scorecard + Send + Sync + 'a;

/// A schedule with its allocation counts.
#[derive(Debug, Clone)]
pub struct ScheduleSummary {
    pub schedule: TestSchedule,
    pub student_count: i64,
    pub completed_count: i64,
}

/// Row-level access to the exam tables. Lookups are by id; callers assemble the
/// values they need instead of walking an object graph.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<Test>>;
    async fn list_tests(&self, test_ids: &[Uuid]) -> Result<Vec<Test>>;
    /// Slots ordered by `question_order`.
    async fn list_test_questions(&self, test_id: Uuid) -> Result<Vec<TestQuestion>>;
    async fn list_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>>;
    async fn list_topics(&self, topic_ids: &[Uuid]) -> Result<Vec<Topic>>;
    async fn list_subjects(&self, subject_ids: &[Uuid]) -> Result<Vec<Subject>>;

    async fn insert_schedule(&self, schedule: &TestSchedule) -> Result<()>;
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<TestSchedule>>;
    /// Newest first, optionally for one test.
    async fn list_schedules(&self, test_id: Option<Uuid>) -> Result<Vec<ScheduleSummary>>;
    async fn list_allocations_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<TestAllocation>>;
    /// Moves the schedule and every allocation on it that is not completed. Returns the
    /// number of allocations moved, or `None` when the schedule does not exist.
    async fn reschedule_schedule(
        &self,
        schedule_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<u64>>;
    /// Removes the schedule with its allocations. Fails when any of them has an attempt.
    async fn delete_schedule(&self, schedule_id: Uuid) -> Result<bool>;
    /// Returns `false` when the student already holds an allocation on that schedule.
    async fn insert_allocation(&self, allocation: &TestAllocation) -> Result<bool>;
    async fn get_allocation(&self, allocation_id: Uuid) -> Result<Option<TestAllocation>>;
    async fn list_allocations_for_student(&self, student_id: Uuid) -> Result<Vec<TestAllocation>>;
    async fn count_allocations_for_test(&self, test_id: Uuid) -> Result<i64>;
    async fn reschedule_allocation(
        &self,
        allocation_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<TestAllocation>>;
    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<bool>;

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>>;
    async fn find_attempt(&self, allocation_id: Uuid, student_id: Uuid) -> Result<Option<TestAttempt>>;
    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<TestAttempt>>;
    /// Insert-if-absent on `(allocation_id, student_id)`; returns the stored row.
    async fn insert_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt>;
    async fn touch_attempt(&self, attempt_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn find_result(&self, test_id: Uuid, student_id: Uuid) -> Result<Option<TestResult>>;
    /// Insert-if-absent on `(test_id, student_id)`; returns the stored row.
    async fn insert_result(&self, result: &TestResult) -> Result<TestResult>;
    async fn list_results_for_student(&self, student_id: Uuid) -> Result<Vec<TestResult>>;
    async fn list_results_for_test(&self, test_id: Uuid) -> Result<Vec<TestResult>>;

    async fn list_answers(&self, result_ids: &[Uuid]) -> Result<Vec<StudentAnswer>>;
    /// Creates `Unvisited` rows for questions that have none yet.
    async fn insert_missing_answers(&self, result_id: Uuid, question_ids: &[Uuid]) -> Result<()>;
    /// Upsert on `(result_id, question_id)`. `None` once the attempt has left
    /// `InProgress` or the result is final. Serialised against `finalize_submission`.
    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        answer: &StudentAnswer,
    ) -> Result<Option<StudentAnswer>>;
    /// Moves `Unvisited` to `Visited` and returns the resulting status.
    async fn mark_visited(&self, result_id: Uuid, question_id: Uuid) -> Result<Option<AnswerStatus>>;

    /// Compare-and-set `InProgress -> Submitted`, then grades the ledger as it stands
    /// under that lock and freezes the result, all atomically.
    ///
    /// Returns `None` when the attempt was no longer in progress. Also returns `None`
    /// when the result was already final through another attempt; that attempt is then
    /// closed without touching the stored score.
    async fn finalize_submission(
        &self,
        submission: &PendingSubmission,
        grade: &Grader<'_>,
    ) -> Result<Option<TestResult>>;
}
