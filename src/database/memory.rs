use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ExamStore, Grader, PendingSubmission, ScheduleSummary};
use crate::error::{Error, Result};
use crate::models::allocation::{TestAllocation, TestSchedule};
use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::question::{Question, Subject, Topic};
use crate::models::test::{Test, TestQuestion};
use crate::models::test_attempt::{AttemptStatus, TestAttempt};
use crate::models::test_result::TestResult;

#[derive(Default)]
struct Tables {
    subjects: HashMap<Uuid, Subject>,
    topics: HashMap<Uuid, Topic>,
    questions: HashMap<Uuid, Question>,
    tests: HashMap<Uuid, Test>,
    test_questions: HashMap<Uuid, TestQuestion>,
    schedules: HashMap<Uuid, TestSchedule>,
    allocations: HashMap<Uuid, TestAllocation>,
    attempts: HashMap<Uuid, TestAttempt>,
    results: HashMap<Uuid, TestResult>,
    answers: HashMap<Uuid, StudentAnswer>,
}

/// In-process store holding every table as rows keyed by id behind one lock.
/// Each trait call takes the lock once, so the same uniqueness and compare-and-set
/// rules as the Postgres schema hold.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    pub fn insert_subject(&self, subject: Subject) -> Result<()> {
        self.lock()?.subjects.insert(subject.id, subject);
        Ok(())
    }

    pub fn insert_topic(&self, topic: Topic) -> Result<()> {
        self.lock()?.topics.insert(topic.id, topic);
        Ok(())
    }

    pub fn insert_question(&self, question: Question) -> Result<()> {
        self.lock()?.questions.insert(question.id, question);
        Ok(())
    }

    pub fn insert_test(&self, test: Test) -> Result<()> {
        self.lock()?.tests.insert(test.id, test);
        Ok(())
    }

    pub fn insert_test_question(&self, slot: TestQuestion) -> Result<()> {
        let mut tables = self.lock()?;
        let duplicate = tables
            .test_questions
            .values()
            .any(|tq| tq.test_id == slot.test_id && tq.question_id == slot.question_id);
        if duplicate {
            return Err(Error::BadRequest("question already in test".to_string()));
        }
        tables.test_questions.insert(slot.id, slot);
        Ok(())
    }
}

fn pick<T: Clone>(rows: &HashMap<Uuid, T>, ids: &[Uuid]) -> Vec<T> {
    ids.iter().filter_map(|id| rows.get(id).cloned()).collect()
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<Test>> {
        Ok(self.lock()?.tests.get(&test_id).cloned())
    }

    async fn list_tests(&self, test_ids: &[Uuid]) -> Result<Vec<Test>> {
        Ok(pick(&self.lock()?.tests, test_ids))
    }

    async fn list_test_questions(&self, test_id: Uuid) -> Result<Vec<TestQuestion>> {
        let tables = self.lock()?;
        let mut slots: Vec<TestQuestion> = tables
            .test_questions
            .values()
            .filter(|tq| tq.test_id == test_id)
            .cloned()
            .collect();
        slots.sort_by_key(|tq| (tq.question_order, tq.id));
        Ok(slots)
    }

    async fn list_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>> {
        Ok(pick(&self.lock()?.questions, question_ids))
    }

    async fn list_topics(&self, topic_ids: &[Uuid]) -> Result<Vec<Topic>> {
        Ok(pick(&self.lock()?.topics, topic_ids))
    }

    async fn list_subjects(&self, subject_ids: &[Uuid]) -> Result<Vec<Subject>> {
        Ok(pick(&self.lock()?.subjects, subject_ids))
    }

    async fn insert_schedule(&self, schedule: &TestSchedule) -> Result<()> {
        self.lock()?.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<TestSchedule>> {
        Ok(self.lock()?.schedules.get(&schedule_id).cloned())
    }

    async fn list_schedules(&self, test_id: Option<Uuid>) -> Result<Vec<ScheduleSummary>> {
        let tables = self.lock()?;
        let mut rows: Vec<ScheduleSummary> = tables
            .schedules
            .values()
            .filter(|s| test_id.map_or(true, |id| s.test_id == id))
            .map(|schedule| {
                let (student_count, completed_count) = tables
                    .allocations
                    .values()
                    .filter(|a| a.schedule_id == schedule.id)
                    .fold((0, 0), |(total, done), a| {
                        (total + 1, done + i64::from(a.is_completed))
                    });
                ScheduleSummary {
                    schedule: schedule.clone(),
                    student_count,
                    completed_count,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.schedule
                .scheduled_start_time
                .cmp(&a.schedule.scheduled_start_time)
        });
        Ok(rows)
    }

    async fn list_allocations_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<TestAllocation>> {
        let tables = self.lock()?;
        let mut rows: Vec<TestAllocation> = tables
            .allocations
            .values()
            .filter(|a| a.schedule_id == schedule_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.allocated_at, a.id));
        Ok(rows)
    }

    async fn reschedule_schedule(
        &self,
        schedule_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let mut tables = self.lock()?;
        let Some(schedule) = tables.schedules.get_mut(&schedule_id) else {
            return Ok(None);
        };
        schedule.scheduled_start_time = start;
        schedule.scheduled_end_time = end;

        let mut moved = 0;
        for allocation in tables.allocations.values_mut() {
            if allocation.schedule_id == schedule_id && !allocation.is_completed {
                allocation.scheduled_start_time = start;
                allocation.scheduled_end_time = end;
                moved += 1;
            }
        }
        Ok(Some(moved))
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> Result<bool> {
        let mut tables = self.lock()?;
        let allocation_ids: Vec<Uuid> = tables
            .allocations
            .values()
            .filter(|a| a.schedule_id == schedule_id)
            .map(|a| a.id)
            .collect();
        if tables
            .attempts
            .values()
            .any(|a| allocation_ids.contains(&a.allocation_id))
        {
            return Err(Error::BadRequest(
                "Schedule has attempts and cannot be deleted".to_string(),
            ));
        }
        for id in &allocation_ids {
            tables.allocations.remove(id);
        }
        Ok(tables.schedules.remove(&schedule_id).is_some())
    }

    async fn insert_allocation(&self, allocation: &TestAllocation) -> Result<bool> {
        let mut tables = self.lock()?;
        let exists = tables.allocations.values().any(|a| {
            a.schedule_id == allocation.schedule_id && a.student_id == allocation.student_id
        });
        if exists {
            return Ok(false);
        }
        tables.allocations.insert(allocation.id, allocation.clone());
        Ok(true)
    }

    async fn get_allocation(&self, allocation_id: Uuid) -> Result<Option<TestAllocation>> {
        Ok(self.lock()?.allocations.get(&allocation_id).cloned())
    }

    async fn list_allocations_for_student(&self, student_id: Uuid) -> Result<Vec<TestAllocation>> {
        let tables = self.lock()?;
        let mut rows: Vec<TestAllocation> = tables
            .allocations
            .values()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.scheduled_start_time);
        Ok(rows)
    }

    async fn count_allocations_for_test(&self, test_id: Uuid) -> Result<i64> {
        let tables = self.lock()?;
        Ok(tables.allocations.values().filter(|a| a.test_id == test_id).count() as i64)
    }

    async fn reschedule_allocation(
        &self,
        allocation_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<TestAllocation>> {
        let mut tables = self.lock()?;
        Ok(tables.allocations.get_mut(&allocation_id).map(|allocation| {
            allocation.scheduled_start_time = start;
            allocation.scheduled_end_time = end;
            allocation.clone()
        }))
    }

    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<bool> {
        let mut tables = self.lock()?;
        if tables.attempts.values().any(|a| a.allocation_id == allocation_id) {
            return Err(Error::BadRequest(
                "allocation is referenced by an attempt".to_string(),
            ));
        }
        Ok(tables.allocations.remove(&allocation_id).is_some())
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<TestAttempt>> {
        Ok(self.lock()?.attempts.get(&attempt_id).cloned())
    }

    async fn find_attempt(&self, allocation_id: Uuid, student_id: Uuid) -> Result<Option<TestAttempt>> {
        let tables = self.lock()?;
        Ok(tables
            .attempts
            .values()
            .find(|a| a.allocation_id == allocation_id && a.student_id == student_id)
            .cloned())
    }

    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<TestAttempt>> {
        let tables = self.lock()?;
        let mut rows: Vec<TestAttempt> = tables
            .attempts
            .values()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn insert_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.attempts.values().find(|a| {
            a.allocation_id == attempt.allocation_id && a.student_id == attempt.student_id
        }) {
            return Ok(existing.clone());
        }
        tables.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt.clone())
    }

    async fn touch_attempt(&self, attempt_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(attempt) = self.lock()?.attempts.get_mut(&attempt_id) {
            attempt.last_activity_at = Some(at);
        }
        Ok(())
    }

    async fn find_result(&self, test_id: Uuid, student_id: Uuid) -> Result<Option<TestResult>> {
        let tables = self.lock()?;
        Ok(tables
            .results
            .values()
            .find(|r| r.test_id == test_id && r.student_id == student_id)
            .cloned())
    }

    async fn insert_result(&self, result: &TestResult) -> Result<TestResult> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .results
            .values()
            .find(|r| r.test_id == result.test_id && r.student_id == result.student_id)
        {
            return Ok(existing.clone());
        }
        tables.results.insert(result.id, result.clone());
        Ok(result.clone())
    }

    async fn list_results_for_student(&self, student_id: Uuid) -> Result<Vec<TestResult>> {
        let tables = self.lock()?;
        let mut rows: Vec<TestResult> = tables
            .results
            .values()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(rows)
    }

    async fn list_results_for_test(&self, test_id: Uuid) -> Result<Vec<TestResult>> {
        let tables = self.lock()?;
        let mut rows: Vec<TestResult> = tables
            .results
            .values()
            .filter(|r| r.test_id == test_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.percentage.cmp(&a.percentage));
        Ok(rows)
    }

    async fn list_answers(&self, result_ids: &[Uuid]) -> Result<Vec<StudentAnswer>> {
        let tables = self.lock()?;
        Ok(tables
            .answers
            .values()
            .filter(|a| result_ids.contains(&a.result_id))
            .cloned()
            .collect())
    }

    async fn insert_missing_answers(&self, result_id: Uuid, question_ids: &[Uuid]) -> Result<()> {
        let mut tables = self.lock()?;
        for question_id in question_ids {
            let present = tables
                .answers
                .values()
                .any(|a| a.result_id == result_id && a.question_id == *question_id);
            if !present {
                let row = StudentAnswer::unvisited(result_id, *question_id);
                tables.answers.insert(row.id, row);
            }
        }
        Ok(())
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        answer: &StudentAnswer,
    ) -> Result<Option<StudentAnswer>> {
        let mut tables = self.lock()?;
        let open = tables
            .attempts
            .get(&attempt_id)
            .is_some_and(|a| a.status == AttemptStatus::InProgress)
            && tables
                .results
                .get(&answer.result_id)
                .is_some_and(|r| !r.is_final());
        if !open {
            return Ok(None);
        }

        let existing = tables
            .answers
            .values_mut()
            .find(|a| a.result_id == answer.result_id && a.question_id == answer.question_id);
        let stored = match existing {
            Some(row) => {
                row.answer_text = answer.answer_text.clone();
                row.status = answer.status;
                row.is_marked_for_review = answer.is_marked_for_review;
                row.answered_at = answer.answered_at;
                row.clone()
            }
            None => {
                tables.answers.insert(answer.id, answer.clone());
                answer.clone()
            }
        };
        Ok(Some(stored))
    }

    async fn mark_visited(&self, result_id: Uuid, question_id: Uuid) -> Result<Option<AnswerStatus>> {
        let mut tables = self.lock()?;
        Ok(tables
            .answers
            .values_mut()
            .find(|a| a.result_id == result_id && a.question_id == question_id)
            .map(|row| {
                row.status = row.status.visited();
                row.status
            }))
    }

    async fn finalize_submission(
        &self,
        submission: &PendingSubmission,
        grade: &Grader<'_>,
    ) -> Result<Option<TestResult>> {
        let mut tables = self.lock()?;

        match tables.attempts.get_mut(&submission.attempt_id) {
            Some(attempt) if attempt.status == AttemptStatus::InProgress => {
                attempt.status = AttemptStatus::Submitted;
                attempt.submit_cause = Some(submission.cause);
                attempt.submitted_at = Some(submission.submitted_at);
                attempt.last_activity_at = Some(submission.submitted_at);
            }
            _ => return Ok(None),
        }

        if let Some(allocation) = tables.allocations.get_mut(&submission.allocation_id) {
            allocation.is_completed = true;
            allocation.completed_at = Some(submission.submitted_at);
        }

        let open = tables
            .results
            .get(&submission.result_id)
            .is_some_and(|r| !r.is_final());
        if !open {
            return Ok(None);
        }

        let answers: Vec<StudentAnswer> = tables
            .answers
            .values()
            .filter(|a| a.result_id == submission.result_id)
            .cloned()
            .collect();
        let card = grade(answers.as_slice());

        for graded in &card.answers {
            if let Some(row) = tables.answers.get_mut(&graded.answer_id) {
                row.is_correct = graded.is_correct;
                row.marks_obtained = graded.marks_obtained;
            }
        }

        Ok(tables.results.get_mut(&submission.result_id).map(|result| {
            result.submitted_at = Some(submission.submitted_at);
            result.obtained_marks = card.obtained_marks;
            result.total_marks = card.total_marks;
            result.percentage = card.percentage;
            result.is_passed = card.is_passed;
            result.time_taken_minutes = submission.time_taken_minutes;
            result.clone()
        }))
    }
}
