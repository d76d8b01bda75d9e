pub mod admin;
pub mod health;
pub mod student;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, patch, post, put},
    Router,
};

use crate::middleware::auth::{require_admin, require_student};
use crate::AppState;

/// Every route of the service, without transport layers.
pub fn router(state: AppState) -> Router {
    let base_routes = Router::new().route("/health", get(health::health));

    let student_api = Router::new()
        .route("/api/student/dashboard", get(student::dashboard))
        .route(
            "/api/student/allocations/:id/instructions",
            get(student::instructions),
        )
        .route(
            "/api/student/allocations/:id/start",
            post(student::start_attempt),
        )
        .route("/api/student/attempts/:id", get(student::take_test))
        .route(
            "/api/student/attempts/:id/answers",
            put(student::save_answer),
        )
        .route(
            "/api/student/attempts/:id/visit",
            post(student::visit_question),
        )
        .route("/api/student/attempts/:id/submit", post(student::submit))
        .route("/api/student/attempts/:id/review", get(student::review))
        .layer(from_fn_with_state(state.clone(), require_student));

    let admin_api = Router::new()
        .route(
            "/api/admin/tests/:id/allocations",
            post(admin::allocate_test),
        )
        .route(
            "/api/admin/allocations/:id",
            patch(admin::reschedule_allocation).delete(admin::delete_allocation),
        )
        .route("/api/admin/schedules", get(admin::list_schedules))
        .route(
            "/api/admin/schedules/:id",
            get(admin::schedule_students)
                .patch(admin::reschedule_schedule)
                .delete(admin::delete_schedule),
        )
        .route(
            "/api/admin/students/:id/report",
            get(admin::student_report),
        )
        .route("/api/admin/tests/:id/summary", get(admin::test_summary))
        .layer(from_fn_with_state(state.clone(), require_admin));

    base_routes
        .merge(student_api)
        .merge(admin_api)
        .with_state(state)
}
