use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::allocation::{TestAllocation, TestSchedule};
use crate::services::allocation_service::{AllocationOutcome, ScheduleListing, ScheduleRoster};
use crate::utils::time::to_local;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AllocateTestRequest {
    #[validate(length(min = 1, max = 500))]
    pub student_ids: Vec<Uuid>,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleQuery {
    pub test_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationResponse {
    pub id: Uuid,
    pub test_id: Uuid,
    pub schedule_id: Uuid,
    pub student_id: Uuid,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_start_local: DateTime<FixedOffset>,
    pub scheduled_end_time: DateTime<Utc>,
    pub scheduled_end_local: DateTime<FixedOffset>,
    pub is_completed: bool,
}

impl AllocationResponse {
    pub fn new(allocation: &TestAllocation, offset: FixedOffset) -> Self {
        Self {
            id: allocation.id,
            test_id: allocation.test_id,
            schedule_id: allocation.schedule_id,
            student_id: allocation.student_id,
            scheduled_start_time: allocation.scheduled_start_time,
            scheduled_start_local: to_local(allocation.scheduled_start_time, offset),
            scheduled_end_time: allocation.scheduled_end_time,
            scheduled_end_local: to_local(allocation.scheduled_end_time, offset),
            is_completed: allocation.is_completed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocateTestResponse {
    pub schedule_id: Uuid,
    pub allocated: Vec<AllocationResponse>,
    pub skipped_student_ids: Vec<Uuid>,
}

impl AllocateTestResponse {
    pub fn new(outcome: AllocationOutcome, offset: FixedOffset) -> Self {
        Self {
            schedule_id: outcome.schedule_id,
            allocated: outcome
                .allocated
                .iter()
                .map(|a| AllocationResponse::new(a, offset))
                .collect(),
            skipped_student_ids: outcome.skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub test_id: Uuid,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_start_local: DateTime<FixedOffset>,
    pub scheduled_end_time: DateTime<Utc>,
    pub scheduled_end_local: DateTime<FixedOffset>,
    pub allocated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleResponse {
    pub fn new(schedule: &TestSchedule, offset: FixedOffset) -> Self {
        Self {
            id: schedule.id,
            test_id: schedule.test_id,
            scheduled_start_time: schedule.scheduled_start_time,
            scheduled_start_local: to_local(schedule.scheduled_start_time, offset),
            scheduled_end_time: schedule.scheduled_end_time,
            scheduled_end_local: to_local(schedule.scheduled_end_time, offset),
            allocated_by: schedule.allocated_by,
            created_at: schedule.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleListItem {
    #[serde(flatten)]
    pub schedule: ScheduleResponse,
    pub test_title: String,
    pub student_count: i64,
    pub completed_count: i64,
    /// Every allocated student has submitted.
    pub is_completed: bool,
}

impl ScheduleListItem {
    pub fn new(listing: &ScheduleListing, offset: FixedOffset) -> Self {
        let summary = &listing.summary;
        Self {
            schedule: ScheduleResponse::new(&summary.schedule, offset),
            test_title: listing.test_title.clone(),
            student_count: summary.student_count,
            completed_count: summary.completed_count,
            is_completed: summary.student_count > 0
                && summary.completed_count == summary.student_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRosterResponse {
    pub schedule: ScheduleResponse,
    pub students: Vec<AllocationResponse>,
}

impl ScheduleRosterResponse {
    pub fn new(roster: &ScheduleRoster, offset: FixedOffset) -> Self {
        Self {
            schedule: ScheduleResponse::new(&roster.schedule, offset),
            students: roster
                .allocations
                .iter()
                .map(|a| AllocationResponse::new(a, offset))
                .collect(),
        }
    }
}
