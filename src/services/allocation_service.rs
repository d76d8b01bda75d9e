use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::database::{ExamStore, ScheduleSummary};
use crate::error::{Error, Result};
use crate::models::allocation::{TestAllocation, TestSchedule};
use crate::services::projection_service::UNKNOWN;
use crate::utils::time::Clock;

#[derive(Debug, Clone, Serialize)]
pub struct AllocationOutcome {
    pub schedule_id: Uuid,
    pub allocated: Vec<TestAllocation>,
    /// Students that already held an allocation on this schedule.
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ScheduleListing {
    pub summary: ScheduleSummary,
    pub test_title: String,
}

#[derive(Debug, Clone)]
pub struct ScheduleRoster {
    pub schedule: TestSchedule,
    pub allocations: Vec<TestAllocation>,
}

#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
}

impl AllocationService {
    pub fn new(store: Arc<dyn ExamStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn allocate(
        &self,
        test_id: Uuid,
        student_ids: &[Uuid],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        allocated_by: Option<Uuid>,
    ) -> Result<AllocationOutcome> {
        validate_window(start, end)?;
        if student_ids.is_empty() {
            return Err(Error::BadRequest("At least one student is required".to_string()));
        }
        if self.store.get_test(test_id).await?.is_none() {
            return Err(Error::NotFound(format!("Test {} not found", test_id)));
        }

        let now = self.clock.now();
        let schedule = TestSchedule {
            id: Uuid::new_v4(),
            test_id,
            scheduled_start_time: start,
            scheduled_end_time: end,
            allocated_by,
            created_at: now,
        };
        self.store.insert_schedule(&schedule).await?;

        let mut seen = HashSet::new();
        let mut allocated = Vec::new();
        let mut skipped = Vec::new();
        for &student_id in student_ids {
            if !seen.insert(student_id) {
                continue;
            }
            let allocation = TestAllocation {
                id: Uuid::new_v4(),
                test_id,
                schedule_id: schedule.id,
                student_id,
                scheduled_start_time: start,
                scheduled_end_time: end,
                is_completed: false,
                completed_at: None,
                allocated_by,
                allocated_at: now,
            };
            if self.store.insert_allocation(&allocation).await? {
                allocated.push(allocation);
            } else {
                skipped.push(student_id);
            }
        }

        tracing::info!(
            test_id = %test_id,
            schedule_id = %schedule.id,
            allocated = allocated.len(),
            skipped = skipped.len(),
            "test allocated"
        );
        Ok(AllocationOutcome {
            schedule_id: schedule.id,
            allocated,
            skipped,
        })
    }

    /// Moves one student's window. Completed allocations keep their window.
    pub async fn reschedule(
        &self,
        allocation_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TestAllocation> {
        validate_window(start, end)?;
        let current = self
            .store
            .get_allocation(allocation_id)
            .await?
            .ok_or(Error::NotAllocated)?;
        if current.is_completed {
            return Err(Error::AlreadySubmitted);
        }

        let updated = self
            .store
            .reschedule_allocation(allocation_id, start, end)
            .await?
            .ok_or(Error::NotAllocated)?;
        tracing::info!(allocation_id = %allocation_id, %start, %end, "allocation rescheduled");
        Ok(updated)
    }

    /// Removes an allocation nobody has started.
    pub async fn delete(&self, allocation_id: Uuid) -> Result<()> {
        let allocation = self
            .store
            .get_allocation(allocation_id)
            .await?
            .ok_or(Error::NotAllocated)?;
        if self
            .store
            .find_attempt(allocation.id, allocation.student_id)
            .await?
            .is_some()
        {
            return Err(Error::BadRequest(
                "Allocation has an attempt and cannot be deleted".to_string(),
            ));
        }
        if !self.store.delete_allocation(allocation_id).await? {
            return Err(Error::NotAllocated);
        }
        tracing::info!(allocation_id = %allocation_id, "allocation deleted");
        Ok(())
    }

    pub async fn list_schedules(&self, test_id: Option<Uuid>) -> Result<Vec<ScheduleListing>> {
        let summaries = self.store.list_schedules(test_id).await?;
        let test_ids: Vec<Uuid> = summaries
            .iter()
            .map(|s| s.schedule.test_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let titles: HashMap<Uuid, String> = self
            .store
            .list_tests(&test_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t.title))
            .collect();

        Ok(summaries
            .into_iter()
            .map(|summary| ScheduleListing {
                test_title: titles
                    .get(&summary.schedule.test_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                summary,
            })
            .collect())
    }

    pub async fn schedule_students(&self, schedule_id: Uuid) -> Result<ScheduleRoster> {
        let schedule = self.load_schedule(schedule_id).await?;
        let allocations = self.store.list_allocations_for_schedule(schedule_id).await?;
        Ok(ScheduleRoster {
            schedule,
            allocations,
        })
    }

    /// Moves a schedule and every allocation on it that is still pending.
    pub async fn reschedule_schedule(
        &self,
        schedule_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ScheduleRoster> {
        validate_window(start, end)?;
        let moved = self
            .store
            .reschedule_schedule(schedule_id, start, end)
            .await?
            .ok_or_else(|| schedule_not_found(schedule_id))?;
        tracing::info!(schedule_id = %schedule_id, moved, %start, %end, "schedule rescheduled");
        self.schedule_students(schedule_id).await
    }

    /// Removes a schedule together with its allocations, as long as nobody has started.
    pub async fn delete_schedule(&self, schedule_id: Uuid) -> Result<()> {
        if !self.store.delete_schedule(schedule_id).await? {
            return Err(schedule_not_found(schedule_id));
        }
        tracing::info!(schedule_id = %schedule_id, "schedule deleted");
        Ok(())
    }

    async fn load_schedule(&self, schedule_id: Uuid) -> Result<TestSchedule> {
        self.store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| schedule_not_found(schedule_id))
    }
}

fn schedule_not_found(schedule_id: Uuid) -> Error {
    Error::NotFound(format!("Schedule {} not found", schedule_id))
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(Error::BadRequest(
            "Scheduled end time must be after the start time".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryStore, PendingSubmission};
    use crate::models::answer::StudentAnswer;
    use crate::models::test::Test;
    use crate::models::test_attempt::{SubmitCause, TestAttempt};
    use crate::models::test_result::TestResult;
    use crate::services::grading_service::GradingService;
    use crate::utils::time::MockClock;
    use chrono::{Duration, TimeZone};

    fn service() -> (AllocationService, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let test = Test {
            id: Uuid::new_v4(),
            subject_id: None,
            title: "Mechanics".into(),
            description: None,
            duration_minutes: 60,
            passing_marks: 1,
            allow_late_submission: false,
            shuffle_questions: false,
            show_results_immediately: true,
            created_at: Utc::now(),
        };
        let test_id = test.id;
        store.insert_test(test).unwrap();

        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
        (AllocationService::new(store.clone(), Arc::new(clock)), store, test_id)
    }

    #[tokio::test]
    async fn duplicate_students_are_skipped() {
        let (service, _store, test_id) = service();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let end = start + Duration::hours(3);
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();

        let outcome = service
            .allocate(test_id, &[s1, s2, s1], start, end, None)
            .await
            .unwrap();
        assert_eq!(outcome.allocated.len(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let (service, _store, test_id) = service();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let err = service
            .allocate(test_id, &[Uuid::new_v4()], start, start, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn reschedule_moves_window() {
        let (service, _store, test_id) = service();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let outcome = service
            .allocate(test_id, &[Uuid::new_v4()], start, start + Duration::hours(1), None)
            .await
            .unwrap();
        let id = outcome.allocated[0].id;

        let later = start + Duration::days(1);
        let moved = service
            .reschedule(id, later, later + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(moved.scheduled_start_time, later);

        service.delete(id).await.unwrap();
        assert!(matches!(
            service.delete(id).await.unwrap_err(),
            Error::NotAllocated
        ));
    }

    #[tokio::test]
    async fn schedule_moves_only_pending_allocations() {
        let (service, store, test_id) = service();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let end = start + Duration::hours(1);
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let outcome = service
            .allocate(test_id, &[s1, s2], start, end, None)
            .await
            .unwrap();

        let done = &outcome.allocated[0];
        let attempt = store
            .insert_attempt(&TestAttempt::begin(done.id, s1, test_id, start, None))
            .await
            .unwrap();
        let result = store
            .insert_result(&TestResult::open(attempt.id, test_id, s1, start))
            .await
            .unwrap();
        let pending = PendingSubmission {
            attempt_id: attempt.id,
            allocation_id: done.id,
            result_id: result.id,
            cause: SubmitCause::Manual,
            submitted_at: start + Duration::minutes(20),
            time_taken_minutes: 20,
        };
        let grade =
            |answers: &[StudentAnswer]| GradingService::score(answers, &[], &HashMap::new(), 0);
        store.finalize_submission(&pending, &grade).await.unwrap();

        let listed = service.list_schedules(Some(test_id)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].test_title, "Mechanics");
        assert_eq!(listed[0].summary.student_count, 2);
        assert_eq!(listed[0].summary.completed_count, 1);

        let later = start + Duration::days(1);
        let roster = service
            .reschedule_schedule(outcome.schedule_id, later, later + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(roster.schedule.scheduled_start_time, later);
        let by_student: HashMap<Uuid, DateTime<Utc>> = roster
            .allocations
            .iter()
            .map(|a| (a.student_id, a.scheduled_start_time))
            .collect();
        assert_eq!(by_student[&s1], start);
        assert_eq!(by_student[&s2], later);

        let err = service.delete_schedule(outcome.schedule_id).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn untouched_schedule_is_deleted_with_its_allocations() {
        let (service, store, test_id) = service();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let outcome = service
            .allocate(test_id, &[Uuid::new_v4()], start, start + Duration::hours(1), None)
            .await
            .unwrap();

        service.delete_schedule(outcome.schedule_id).await.unwrap();
        assert!(store
            .get_allocation(outcome.allocated[0].id)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            service.schedule_students(outcome.schedule_id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            service
                .reschedule_schedule(outcome.schedule_id, start, start + Duration::hours(1))
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
