use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestResult {
    pub id: Uuid,
    pub test_id: Uuid,
    pub student_id: Uuid,
    pub attempt_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub obtained_marks: i32,
    pub total_marks: i32,
    pub percentage: Decimal,
    pub is_passed: bool,
    pub time_taken_minutes: i32,
}

impl TestResult {
    pub fn open(attempt_id: Uuid, test_id: Uuid, student_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            student_id,
            attempt_id,
            started_at,
            submitted_at: None,
            obtained_marks: 0,
            total_marks: 0,
            percentage: Decimal::ZERO,
            is_passed: false,
            time_taken_minutes: 0,
        }
    }

    pub fn is_final(&self) -> bool {
        self.submitted_at.is_some()
    }
}
