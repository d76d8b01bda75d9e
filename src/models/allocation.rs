use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestSchedule {
    pub id: Uuid,
    pub test_id: Uuid,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    pub allocated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Assignment of a test window to one student. The window is copied from the schedule
/// so it can be moved per student.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestAllocation {
    pub id: Uuid,
    pub test_id: Uuid,
    pub schedule_id: Uuid,
    pub student_id: Uuid,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub allocated_by: Option<Uuid>,
    pub allocated_at: DateTime<Utc>,
}

impl TestAllocation {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_start_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.scheduled_end_time
    }
}
