use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::student_dto::{
    AttemptResponse, DashboardResponse, InstructionsResponse, ResultResponse, ReviewResponse,
    SaveAnswerRequest, SaveAnswerResponse, TakeTestResponse, VisitRequest, VisitResponse,
};
use crate::middleware::auth::CurrentUser;
use crate::services::attempt_service::AttemptView;
use crate::AppState;

#[axum::debug_handler]
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> crate::error::Result<Response> {
    let dashboard = state.attempt_service.dashboard(user.id).await?;
    Ok(Json(DashboardResponse::new(dashboard, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn instructions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(allocation_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let view = state
        .attempt_service
        .instructions(allocation_id, user.id)
        .await?;
    Ok(Json(InstructionsResponse::new(view, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(allocation_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let attempt = state
        .attempt_service
        .start_attempt(allocation_id, user.id)
        .await?;
    Ok(Json(AttemptResponse::new(&attempt, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn take_test(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let response = match state.attempt_service.open_attempt(attempt_id, user.id).await? {
        AttemptView::InProgress(session) => TakeTestResponse::running(session, state.display_offset),
        AttemptView::Finished(attempt) => TakeTestResponse::finished(&attempt, state.display_offset),
    };
    Ok(Json(response).into_response())
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SaveAnswerRequest>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let saved = state
        .attempt_service
        .save_answer(
            attempt_id,
            user.id,
            payload.question_id,
            payload.answer_text,
            payload.marked_for_review,
        )
        .await?;
    Ok(Json(SaveAnswerResponse::new(saved, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn visit_question(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<VisitRequest>,
) -> crate::error::Result<Response> {
    let status = state
        .attempt_service
        .mark_visited(attempt_id, user.id, payload.question_id)
        .await?;
    Ok(Json(VisitResponse {
        question_id: payload.question_id,
        status,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn submit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let result = state.attempt_service.submit(attempt_id, user.id).await?;
    Ok(Json(ResultResponse::new(&result, state.display_offset)).into_response())
}

#[axum::debug_handler]
pub async fn review(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let view = state.attempt_service.review(attempt_id, user.id).await?;
    Ok(Json(ReviewResponse::new(view, state.display_offset)).into_response())
}
