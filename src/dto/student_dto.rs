use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::answer::{AnswerStatus, StudentAnswer};
use crate::models::test_attempt::{AttemptStatus, TestAttempt};
use crate::models::test_result::TestResult;
use crate::services::attempt_service::{
    CompletedEntry, Dashboard, DashboardEntry, InstructionsView, ReviewQuestion, ReviewView,
    SessionQuestion, TestSession,
};
use crate::services::projection_service::ResultBreakdown;
use crate::utils::time::to_local;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    #[validate(length(max = 1000))]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub marked_for_review: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitRequest {
    pub question_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResponse {
    pub attempt_id: Uuid,
    pub allocation_id: Uuid,
    pub test_id: Uuid,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub started_at_local: DateTime<FixedOffset>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_at_local: Option<DateTime<FixedOffset>>,
}

impl AttemptResponse {
    pub fn new(attempt: &TestAttempt, offset: FixedOffset) -> Self {
        Self {
            attempt_id: attempt.id,
            allocation_id: attempt.allocation_id,
            test_id: attempt.test_id,
            status: attempt.reported_status(),
            started_at: attempt.started_at,
            started_at_local: to_local(attempt.started_at, offset),
            submitted_at: attempt.submitted_at,
            submitted_at_local: attempt.submitted_at.map(|t| to_local(t, offset)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub attempt: AttemptResponse,
    pub result_id: Uuid,
    pub test_title: String,
    pub duration_minutes: i32,
    pub seconds_remaining: i64,
    pub questions: Vec<SessionQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TakeTestResponse {
    InProgress(SessionResponse),
    Finished { attempt: AttemptResponse },
}

impl TakeTestResponse {
    pub fn running(session: TestSession, offset: FixedOffset) -> Self {
        Self::InProgress(SessionResponse {
            attempt: AttemptResponse::new(&session.attempt, offset),
            result_id: session.result_id,
            test_title: session.test.title,
            duration_minutes: session.test.duration_minutes,
            seconds_remaining: session.seconds_remaining,
            questions: session.questions,
        })
    }

    pub fn finished(attempt: &TestAttempt, offset: FixedOffset) -> Self {
        Self::Finished {
            attempt: AttemptResponse::new(attempt, offset),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionsResponse {
    pub allocation_id: Uuid,
    pub test_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub question_count: usize,
    pub total_marks: i32,
    pub passing_marks: i32,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_start_local: DateTime<FixedOffset>,
    pub scheduled_end_time: DateTime<Utc>,
    pub scheduled_end_local: DateTime<FixedOffset>,
    pub can_start: bool,
}

impl InstructionsResponse {
    pub fn new(view: InstructionsView, offset: FixedOffset) -> Self {
        let start = view.allocation.scheduled_start_time;
        let end = view.allocation.scheduled_end_time;
        Self {
            allocation_id: view.allocation.id,
            test_id: view.test.id,
            title: view.test.title,
            description: view.test.description,
            duration_minutes: view.test.duration_minutes,
            question_count: view.question_count,
            total_marks: view.total_marks,
            passing_marks: view.test.passing_marks,
            scheduled_start_time: start,
            scheduled_start_local: to_local(start, offset),
            scheduled_end_time: end,
            scheduled_end_local: to_local(end, offset),
            can_start: view.can_start,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub result_id: Uuid,
    pub test_id: Uuid,
    pub obtained_marks: i32,
    pub total_marks: i32,
    pub percentage: Decimal,
    pub is_passed: bool,
    pub time_taken_minutes: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_at_local: Option<DateTime<FixedOffset>>,
}

impl ResultResponse {
    pub fn new(result: &TestResult, offset: FixedOffset) -> Self {
        Self {
            result_id: result.id,
            test_id: result.test_id,
            obtained_marks: result.obtained_marks,
            total_marks: result.total_marks,
            percentage: result.percentage,
            is_passed: result.is_passed,
            time_taken_minutes: result.time_taken_minutes,
            submitted_at: result.submitted_at,
            submitted_at_local: result.submitted_at.map(|t| to_local(t, offset)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewResponse {
    pub attempt: AttemptResponse,
    pub test_title: String,
    pub show_answers: bool,
    pub result: ResultResponse,
    pub questions: Vec<ReviewQuestion>,
    pub breakdown: ResultBreakdown,
}

impl ReviewResponse {
    pub fn new(view: ReviewView, offset: FixedOffset) -> Self {
        Self {
            attempt: AttemptResponse::new(&view.attempt, offset),
            test_title: view.test.title,
            show_answers: view.test.show_results_immediately,
            result: ResultResponse::new(&view.result, offset),
            questions: view.questions,
            breakdown: view.breakdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveAnswerResponse {
    pub question_id: Uuid,
    pub status: AnswerStatus,
    pub answer_text: Option<String>,
    pub is_marked_for_review: bool,
    pub saved_at: Option<DateTime<Utc>>,
    pub saved_at_local: Option<DateTime<FixedOffset>>,
}

impl SaveAnswerResponse {
    pub fn new(answer: StudentAnswer, offset: FixedOffset) -> Self {
        Self {
            question_id: answer.question_id,
            status: answer.status,
            saved_at_local: answer.answered_at.map(|t| to_local(t, offset)),
            saved_at: answer.answered_at,
            answer_text: answer.answer_text,
            is_marked_for_review: answer.is_marked_for_review,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitResponse {
    pub question_id: Uuid,
    pub status: AnswerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardItem {
    pub allocation_id: Uuid,
    pub test_id: Uuid,
    pub test_title: String,
    pub duration_minutes: i32,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_start_local: DateTime<FixedOffset>,
    pub scheduled_end_time: DateTime<Utc>,
    pub scheduled_end_local: DateTime<FixedOffset>,
    pub attempt_id: Option<Uuid>,
    pub status: AttemptStatus,
}

impl DashboardItem {
    fn new(entry: DashboardEntry, offset: FixedOffset) -> Self {
        let start = entry.allocation.scheduled_start_time;
        let end = entry.allocation.scheduled_end_time;
        Self {
            allocation_id: entry.allocation.id,
            test_id: entry.allocation.test_id,
            test_title: entry.test_title,
            duration_minutes: entry.duration_minutes,
            scheduled_start_time: start,
            scheduled_start_local: to_local(start, offset),
            scheduled_end_time: end,
            scheduled_end_local: to_local(end, offset),
            attempt_id: entry.attempt.as_ref().map(|a| a.id),
            status: entry
                .attempt
                .as_ref()
                .map_or(AttemptStatus::NotStarted, TestAttempt::reported_status),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedItem {
    pub test_title: String,
    pub attempt_id: Uuid,
    pub result: ResultResponse,
}

impl CompletedItem {
    fn new(entry: CompletedEntry, offset: FixedOffset) -> Self {
        Self {
            attempt_id: entry.result.attempt_id,
            result: ResultResponse::new(&entry.result, offset),
            test_title: entry.test_title,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub upcoming: Vec<DashboardItem>,
    pub in_progress: Vec<DashboardItem>,
    pub completed: Vec<CompletedItem>,
}

impl DashboardResponse {
    pub fn new(dashboard: Dashboard, offset: FixedOffset) -> Self {
        Self {
            upcoming: dashboard
                .upcoming
                .into_iter()
                .map(|e| DashboardItem::new(e, offset))
                .collect(),
            in_progress: dashboard
                .in_progress
                .into_iter()
                .map(|e| DashboardItem::new(e, offset))
                .collect(),
            completed: dashboard
                .completed
                .into_iter()
                .map(|e| CompletedItem::new(e, offset))
                .collect(),
        }
    }
}
