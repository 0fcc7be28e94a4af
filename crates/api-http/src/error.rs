//! API Error Types
//!
//! Maps application errors to HTTP statuses and a `{"error", "message"}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quarry_core::domain::DomainError;
use quarry_core::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable error codes
pub mod code {
    pub const VALIDATION: &str = "validation";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE_REPOSITORY: &str = "duplicate_repository";
    pub const REPOSITORY_BUSY: &str = "repository_busy";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const QUEUE_UNAVAILABLE: &str = "queue_unavailable";
    pub const INTERNAL: &str = "internal";
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),

    /// Request body or path could not be parsed
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, code::VALIDATION),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, code::INTERNAL),
            ApiError::App(err) => match err {
                AppError::Validation(_) | AppError::Serialization(_) => {
                    (StatusCode::BAD_REQUEST, code::VALIDATION)
                }
                AppError::Domain(DomainError::Validation(_)) => {
                    (StatusCode::BAD_REQUEST, code::VALIDATION)
                }
                AppError::Domain(DomainError::InvalidStateTransition { .. })
                | AppError::InvalidState(_) => (StatusCode::CONFLICT, code::INVALID_STATE),
                AppError::NotFound(_) => (StatusCode::NOT_FOUND, code::NOT_FOUND),
                AppError::DuplicateRepository(_) => {
                    (StatusCode::CONFLICT, code::DUPLICATE_REPOSITORY)
                }
                AppError::RepositoryBusy(_) => (StatusCode::CONFLICT, code::REPOSITORY_BUSY),
                AppError::QueueUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, code::QUEUE_UNAVAILABLE)
                }
                AppError::Database(_)
                | AppError::Io(_)
                | AppError::Config(_)
                | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, code::INTERNAL),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::RepositoryBusy("r".into()), StatusCode::CONFLICT, code::REPOSITORY_BUSY),
            (
                AppError::DuplicateRepository("r".into()),
                StatusCode::CONFLICT,
                code::DUPLICATE_REPOSITORY,
            ),
            (AppError::NotFound("r".into()), StatusCode::NOT_FOUND, code::NOT_FOUND),
            (AppError::Validation("v".into()), StatusCode::BAD_REQUEST, code::VALIDATION),
            (
                AppError::QueueUnavailable("q".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                code::QUEUE_UNAVAILABLE,
            ),
            (AppError::Database("d".into()), StatusCode::INTERNAL_SERVER_ERROR, code::INTERNAL),
        ];
        for (err, status, code) in cases {
            assert_eq!(ApiError::from(err).status_and_code(), (status, code));
        }
    }
}
