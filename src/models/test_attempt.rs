use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Submitted,
    TimeExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submit_cause", rename_all = "snake_case")]
pub enum SubmitCause {
    Manual,
    TimeExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestAttempt {
    pub id: Uuid,
    pub allocation_id: Uuid,
    pub student_id: Uuid,
    pub test_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub submit_cause: Option<SubmitCause>,
    /// Question ids in presentation order; `None` means natural order.
    pub shuffled_order: Option<Vec<Uuid>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TestAttempt {
    pub fn begin(
        allocation_id: Uuid,
        student_id: Uuid,
        test_id: Uuid,
        started_at: DateTime<Utc>,
        shuffled_order: Option<Vec<Uuid>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            allocation_id,
            student_id,
            test_id,
            started_at,
            submitted_at: None,
            status: AttemptStatus::InProgress,
            submit_cause: None,
            shuffled_order,
            last_activity_at: Some(started_at),
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.status, AttemptStatus::Submitted | AttemptStatus::TimeExpired)
    }

    /// Strictly more than `duration_minutes` since start.
    pub fn is_expired(&self, duration_minutes: i32, now: DateTime<Utc>) -> bool {
        now - self.started_at > Duration::minutes(i64::from(duration_minutes))
    }

    pub fn seconds_remaining(&self, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
        let deadline = self.started_at + Duration::minutes(i64::from(duration_minutes));
        (deadline - now).num_seconds().max(0)
    }

    /// Status for reporting: a submission caused by the timer reads as `TimeExpired`.
    pub fn reported_status(&self) -> AttemptStatus {
        match (self.status, self.submit_cause) {
            (AttemptStatus::Submitted, Some(SubmitCause::TimeExpired)) => AttemptStatus::TimeExpired,
            (status, _) => status,
        }
    }
}
