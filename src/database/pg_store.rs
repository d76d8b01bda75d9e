use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ExamStore, Grader, PendingSubmission, ScheduleSummary};
use crate::error::{Error, Result};
use crate::models::allocation::{TestAllocation, TestSchedule};
use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::question::{Question, Subject, Topic};
use crate::models::test::{Test, TestQuestion};
use crate::models::test_attempt::TestAttempt;
use crate::models::test_result::TestResult;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<Test>> {
        let test = sqlx::query_as::<_, Test>(r#"SELECT * FROM tests WHERE id = $1"#)
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(test)
    }

    async fn list_tests(&self, test_ids: &[Uuid]) -> Result<Vec<Test>> {
        let tests = sqlx::query_as::<_, Test>(r#"SELECT * FROM tests WHERE id = ANY($1)"#)
            .bind(test_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(tests)
    }

    async fn list_test_questions(&self, test_id: Uuid) -> Result<Vec<TestQuestion>> {
        let rows = sqlx::query_as::<_, TestQuestion>(
            r#"SELECT * FROM test_questions WHERE test_id = $1 ORDER BY question_order, id"#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, Question>(r#"SELECT * FROM questions WHERE id = ANY($1)"#)
            .bind(question_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_topics(&self, topic_ids: &[Uuid]) -> Result<Vec<Topic>> {
        let rows = sqlx::query_as::<_, Topic>(r#"SELECT * FROM topics WHERE id = ANY($1)"#)
            .bind(topic_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_subjects(&self, subject_ids: &[Uuid]) -> Result<Vec<Subject>> {
        let rows = sqlx::query_as::<_, Subject>(r#"SELECT * FROM subjects WHERE id = ANY($1)"#)
            .bind(subject_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_schedule(&self, schedule: &TestSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO test_schedules (
                id, test_id, scheduled_start_time, scheduled_end_time, allocated_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.test_id)
        .bind(schedule.scheduled_start_time)
        .bind(schedule.scheduled_end_time)
        .bind(schedule.allocated_by)
        .bind(schedule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<TestSchedule>> {
        let row = sqlx::query_as::<_, TestSchedule>(r#"SELECT * FROM test_schedules WHERE id = $1"#)
            .bind(schedule_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_schedules(&self, test_id: Option<Uuid>) -> Result<Vec<ScheduleSummary>> {
        let schedules = sqlx::query_as::<_, TestSchedule>(
            r#"
            SELECT * FROM test_schedules
            WHERE $1::uuid IS NULL OR test_id = $1
            ORDER BY scheduled_start_time DESC
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = schedules.iter().map(|s| s.id).collect();
        let counts: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT schedule_id, COUNT(*), COUNT(*) FILTER (WHERE is_completed)
            FROM test_allocations
            WHERE schedule_id = ANY($1)
            GROUP BY schedule_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(schedules
            .into_iter()
            .map(|schedule| {
                let (student_count, completed_count) = counts
                    .iter()
                    .find(|(id, _, _)| *id == schedule.id)
                    .map_or((0, 0), |&(_, total, done)| (total, done));
                ScheduleSummary {
                    schedule,
                    student_count,
                    completed_count,
                }
            })
            .collect())
    }

    async fn list_allocations_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<TestAllocation>> {
        let rows = sqlx::query_as::<_, TestAllocation>(
            r#"SELECT * FROM test_allocations WHERE schedule_id = $1 ORDER BY allocated_at, id"#,
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reschedule_schedule(
        &self,
        schedule_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let found = sqlx::query(
            r#"
            UPDATE test_schedules SET scheduled_start_time = $2, scheduled_end_time = $3
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        if !found {
            tx.rollback().await?;
            return Ok(None);
        }

        let moved = sqlx::query(
            r#"
            UPDATE test_allocations SET scheduled_start_time = $2, scheduled_end_time = $3
            WHERE schedule_id = $1 AND NOT is_completed
            "#,
        )
        .bind(schedule_id)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(Some(moved))
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let started: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM test_attempts t
                JOIN test_allocations a ON a.id = t.allocation_id
                WHERE a.schedule_id = $1
            )
            "#,
        )
        .bind(schedule_id)
        .fetch_one(&mut *tx)
        .await?;
        if started {
            tx.rollback().await?;
            return Err(Error::BadRequest(
                "Schedule has attempts and cannot be deleted".to_string(),
            ));
        }

        sqlx::query(r#"DELETE FROM test_allocations WHERE schedule_id = $1"#)
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query(r#"DELETE FROM test_schedules WHERE id = $1"#)
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted == 1)
    }

    async fn insert_allocation(&self, allocation: &TestAllocation) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO test_allocations (
                id, test_id, schedule_id, student_id, scheduled_start_time, scheduled_end_time,
                is_completed, completed_at, allocated_by, allocated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (schedule_id, student_id) DO NOTHING
            "#,
        )
        .bind(allocation.id)
        .bind(allocation.test_id)
        .bind(allocation.schedule_id)
        .bind(allocation.student_id)
        .bind(allocation.scheduled_start_time)
        .bind(allocation.scheduled_end_time)
        .bind(allocation.is_completed)
        .bind(allocation.completed_at)
        .bind(allocation.allocated_by)
        .bind(allocation.allocated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn get_allocation(&self, allocation_id: Uuid) -> Result<Option<TestAllocation>> {
        let row = sqlx::query_as::<_, TestAllocation>(
            r#"SELECT * FROM test_allocations WHERE id = $1"#,
        )
        .bind(allocation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_allocations_for_student(&self, student_id: Uuid) -> Result<Vec<TestAllocation>> {
        let rows = sqlx::query_as::<_, TestAllocation>(
            r#"SELECT * FROM test_allocations WHERE student_id = $1 ORDER BY scheduled_start_time"#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_allocations_for_test(&self, test_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM test_allocations WHERE test_id = $1"#)
                .bind(test_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn reschedule_allocation(
        &self,
        allocation_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<TestAllocation>> {
        let row = sqlx::query_as::<_, TestAllocation>(
            r#"
            UPDATE test_allocations
            SET scheduled_start_time = $2, scheduled_end_time = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(allocation_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<bool> {
        let deleted = sqlx::query(r#"DELETE FROM test_allocations WHERE id = $1"#)
            .bind(allocation_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted == 1)
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>> {
        let row = sqlx::query_as::<_, TestAttempt>(r#"SELECT * FROM test_attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_attempt(&self, allocation_id: Uuid, student_id: Uuid) -> Result<Option<TestAttempt>> {
        let row = sqlx::query_as::<_, TestAttempt>(
            r#"SELECT * FROM test_attempts WHERE allocation_id = $1 AND student_id = $2"#,
        )
        .bind(allocation_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<TestAttempt>> {
        let rows = sqlx::query_as::<_, TestAttempt>(
            r#"SELECT * FROM test_attempts WHERE student_id = $1 ORDER BY started_at DESC"#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt> {
        sqlx::query(
            r#"
            INSERT INTO test_attempts (
                id, allocation_id, student_id, test_id, started_at, submitted_at,
                status, submit_cause, shuffled_order, last_activity_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (allocation_id, student_id) DO NOTHING
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.allocation_id)
        .bind(attempt.student_id)
        .bind(attempt.test_id)
        .bind(attempt.started_at)
        .bind(attempt.submitted_at)
        .bind(attempt.status)
        .bind(attempt.submit_cause)
        .bind(&attempt.shuffled_order)
        .bind(attempt.last_activity_at)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, TestAttempt>(
            r#"SELECT * FROM test_attempts WHERE allocation_id = $1 AND student_id = $2"#,
        )
        .bind(attempt.allocation_id)
        .bind(attempt.student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn touch_attempt(&self, attempt_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(r#"UPDATE test_attempts SET last_activity_at = $2 WHERE id = $1"#)
            .bind(attempt_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_result(&self, test_id: Uuid, student_id: Uuid) -> Result<Option<TestResult>> {
        let row = sqlx::query_as::<_, TestResult>(
            r#"SELECT * FROM test_results WHERE test_id = $1 AND student_id = $2"#,
        )
        .bind(test_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_result(&self, result: &TestResult) -> Result<TestResult> {
        sqlx::query(
            r#"
            INSERT INTO test_results (
                id, test_id, student_id, attempt_id, started_at, submitted_at,
                obtained_marks, total_marks, percentage, is_passed, time_taken_minutes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (test_id, student_id) DO NOTHING
            "#,
        )
        .bind(result.id)
        .bind(result.test_id)
        .bind(result.student_id)
        .bind(result.attempt_id)
        .bind(result.started_at)
        .bind(result.submitted_at)
        .bind(result.obtained_marks)
        .bind(result.total_marks)
        .bind(result.percentage)
        .bind(result.is_passed)
        .bind(result.time_taken_minutes)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, TestResult>(
            r#"SELECT * FROM test_results WHERE test_id = $1 AND student_id = $2"#,
        )
        .bind(result.test_id)
        .bind(result.student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn list_results_for_student(&self, student_id: Uuid) -> Result<Vec<TestResult>> {
        let rows = sqlx::query_as::<_, TestResult>(
            r#"
            SELECT * FROM test_results
            WHERE student_id = $1
            ORDER BY submitted_at DESC NULLS LAST
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_results_for_test(&self, test_id: Uuid) -> Result<Vec<TestResult>> {
        let rows = sqlx::query_as::<_, TestResult>(
            r#"SELECT * FROM test_results WHERE test_id = $1 ORDER BY percentage DESC"#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_answers(&self, result_ids: &[Uuid]) -> Result<Vec<StudentAnswer>> {
        let rows = sqlx::query_as::<_, StudentAnswer>(
            r#"SELECT * FROM student_answers WHERE result_id = ANY($1)"#,
        )
        .bind(result_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_missing_answers(&self, result_id: Uuid, question_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_answers (id, result_id, question_id, status)
            SELECT gen_random_uuid(), $1, q.question_id, 'unvisited'
            FROM UNNEST($2::uuid[]) AS q(question_id)
            ON CONFLICT (result_id, question_id) DO NOTHING
            "#,
        )
        .bind(result_id)
        .bind(question_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        answer: &StudentAnswer,
    ) -> Result<Option<StudentAnswer>> {
        let mut tx = self.pool.begin().await?;

        // Blocks while a submission holds the attempt row, then sees its outcome.
        let open: Option<Uuid> = sqlx::query_scalar(
            r#"SELECT id FROM test_attempts WHERE id = $1 AND status = 'in_progress' FOR SHARE"#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, StudentAnswer>(
            r#"
            INSERT INTO student_answers (
                id, result_id, question_id, answer_text, is_correct, marks_obtained,
                status, is_marked_for_review, answered_at
            )
            SELECT $1, $2, $3, $4, FALSE, 0, $5, $6, $7
            FROM test_results r
            WHERE r.id = $2 AND r.submitted_at IS NULL
            ON CONFLICT (result_id, question_id) DO UPDATE
            SET answer_text = EXCLUDED.answer_text,
                status = EXCLUDED.status,
                is_marked_for_review = EXCLUDED.is_marked_for_review,
                answered_at = EXCLUDED.answered_at
            RETURNING *
            "#,
        )
        .bind(answer.id)
        .bind(answer.result_id)
        .bind(answer.question_id)
        .bind(&answer.answer_text)
        .bind(answer.status)
        .bind(answer.is_marked_for_review)
        .bind(answer.answered_at)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn mark_visited(&self, result_id: Uuid, question_id: Uuid) -> Result<Option<AnswerStatus>> {
        sqlx::query(
            r#"
            UPDATE student_answers SET status = 'visited'
            WHERE result_id = $1 AND question_id = $2 AND status = 'unvisited'
            "#,
        )
        .bind(result_id)
        .bind(question_id)
        .execute(&self.pool)
        .await?;

        let status: Option<AnswerStatus> = sqlx::query_scalar(
            r#"SELECT status FROM student_answers WHERE result_id = $1 AND question_id = $2"#,
        )
        .bind(result_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    async fn finalize_submission(
        &self,
        submission: &PendingSubmission,
        grade: &Grader<'_>,
    ) -> Result<Option<TestResult>> {
        let mut tx = self.pool.begin().await?;

        let won = sqlx::query(
            r#"
            UPDATE test_attempts
            SET status = 'submitted', submit_cause = $2, submitted_at = $3, last_activity_at = $3
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(submission.attempt_id)
        .bind(submission.cause)
        .bind(submission.submitted_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !won {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"UPDATE test_allocations SET is_completed = TRUE, completed_at = $2 WHERE id = $1"#,
        )
        .bind(submission.allocation_id)
        .bind(submission.submitted_at)
        .execute(&mut *tx)
        .await?;

        let open = sqlx::query_as::<_, TestResult>(
            r#"SELECT * FROM test_results WHERE id = $1 AND submitted_at IS NULL FOR UPDATE"#,
        )
        .bind(submission.result_id)
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_none() {
            tx.commit().await?;
            return Ok(None);
        }

        let answers = sqlx::query_as::<_, StudentAnswer>(
            r#"SELECT * FROM student_answers WHERE result_id = $1 FOR UPDATE"#,
        )
        .bind(submission.result_id)
        .fetch_all(&mut *tx)
        .await?;
        let card = grade(answers.as_slice());

        for graded in &card.answers {
            sqlx::query(
                r#"UPDATE student_answers SET is_correct = $2, marks_obtained = $3 WHERE id = $1"#,
            )
            .bind(graded.answer_id)
            .bind(graded.is_correct)
            .bind(graded.marks_obtained)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query_as::<_, TestResult>(
            r#"
            UPDATE test_results
            SET submitted_at = $2, obtained_marks = $3, total_marks = $4, percentage = $5,
                is_passed = $6, time_taken_minutes = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(submission.result_id)
        .bind(submission.submitted_at)
        .bind(card.obtained_marks)
        .bind(card.total_marks)
        .bind(card.percentage)
        .bind(card.is_passed)
        .bind(submission.time_taken_minutes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(result))
    }
}
