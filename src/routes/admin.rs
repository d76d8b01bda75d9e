use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::admin_dto::{
    AllocateTestRequest, AllocateTestResponse, AllocationResponse, RescheduleRequest,
    ScheduleListItem, ScheduleQuery, ScheduleRosterResponse,
};
use crate::middleware::auth::CurrentUser;
use crate::AppState;

#[axum::debug_handler]
pub async fn allocate_test(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<AllocateTestRequest>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let outcome = state
        .allocation_service
        .allocate(
            test_id,
            &payload.student_ids,
            payload.scheduled_start_time,
            payload.scheduled_end_time,
            Some(user.id),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AllocateTestResponse::new(outcome, state.display_offset)),
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn reschedule_allocation(
    State(state): State<AppState>,
    Path(allocation_id): Path<Uuid>,
    Json(payload): Json<RescheduleRequest>,
) -> crate::error::Result<Response> {
    let allocation = state
        .allocation_service
        .reschedule(
            allocation_id,
            payload.scheduled_start_time,
            payload.scheduled_end_time,
        )
        .await?;
    Ok(Json(AllocationResponse::new(&allocation, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn delete_allocation(
    State(state): State<AppState>,
    Path(allocation_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    state.allocation_service.delete(allocation_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> crate::error::Result<Response> {
    let listings = state.allocation_service.list_schedules(query.test_id).await?;
    let items: Vec<ScheduleListItem> = listings
        .iter()
        .map(|l| ScheduleListItem::new(l, state.display_offset))
        .collect();
    Ok(Json(items).into_response())
}

#[axum::debug_handler]
pub async fn schedule_students(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let roster = state.allocation_service.schedule_students(schedule_id).await?;
    Ok(Json(ScheduleRosterResponse::new(&roster, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn reschedule_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Json(payload): Json<RescheduleRequest>,
) -> crate::error::Result<Response> {
    let roster = state
        .allocation_service
        .reschedule_schedule(
            schedule_id,
            payload.scheduled_start_time,
            payload.scheduled_end_time,
        )
        .await?;
    Ok(Json(ScheduleRosterResponse::new(&roster, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    state.allocation_service.delete_schedule(schedule_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn student_report(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let report = state.projection_service.student_report(student_id).await?;
    Ok(Json(report).into_response())
}

#[axum::debug_handler]
pub async fn test_summary(
    State(state): State<AppState>,
    Path(test_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let summary = state.projection_service.test_summary(test_id).await?;
    Ok(Json(summary).into_response())
}
