use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Test is not allocated to this student")]
    NotAllocated,

    #[error("Test window has not opened yet")]
    WindowNotOpen,

    #[error("Test window has closed")]
    WindowClosed,

    #[error("Test has already been submitted")]
    AlreadySubmitted,

    #[error("Test attempt not found")]
    AttemptNotFound,

    #[error("Test result not found")]
    ResultNotFound,

    #[error("Test attempt is still in progress")]
    AttemptInProgress,

    #[error("Question does not belong to this test")]
    QuestionNotInTest,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotAllocated => "not_allocated",
            Error::WindowNotOpen => "window_not_open",
            Error::WindowClosed => "window_closed",
            Error::AlreadySubmitted => "already_submitted",
            Error::AttemptNotFound => "attempt_not_found",
            Error::ResultNotFound => "result_not_found",
            Error::AttemptInProgress => "attempt_in_progress",
            Error::QuestionNotInTest => "question_not_in_test",
            Error::Config(_) => "configuration_error",
            Error::BadRequest(_) | Error::Json(_) => "bad_request",
            Error::Validation(_) => "validation_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Database(_) | Error::Migrate(_) | Error::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotAllocated
            | Error::AttemptNotFound
            | Error::ResultNotFound
            | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::WindowNotOpen | Error::WindowClosed | Error::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            Error::AlreadySubmitted | Error::AttemptInProgress => StatusCode::CONFLICT,
            Error::QuestionNotInTest
            | Error::BadRequest(_)
            | Error::Validation(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Config(_) | Error::Database(_) | Error::Migrate(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            Error::Database(err) => {
                tracing::error!(error = %err, "database error");
                "An unexpected error occurred".to_string()
            }
            Error::Migrate(_) | Error::Internal(_) | Error::Config(_) => {
                tracing::error!(error = %self, "internal error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({ "error": self.code(), "message": message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_are_client_errors() {
        for err in [
            Error::NotAllocated,
            Error::WindowNotOpen,
            Error::WindowClosed,
            Error::AlreadySubmitted,
            Error::AttemptNotFound,
            Error::ResultNotFound,
            Error::AttemptInProgress,
            Error::QuestionNotInTest,
        ] {
            assert!(err.status().is_client_error(), "{err:?}");
        }
        assert_eq!(Error::AlreadySubmitted.status(), StatusCode::CONFLICT);
        assert_eq!(Error::WindowNotOpen.code(), "window_not_open");
    }
}
