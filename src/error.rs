use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No verified caller identity was supplied.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// A required field is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Referenced tournament does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller is not allowed to act on the resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// An optimistic transaction kept losing races; never returned verbatim to callers.
    #[error("transaction conflict")]
    Conflict(#[source] StorageError),
    /// Unexpected store or logic failure.
    #[error("internal failure")]
    Internal(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        if err.is_conflict() {
            ServiceError::Conflict(err)
        } else {
            ServiceError::Internal(err)
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::InvalidArgument(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or blank caller identity.
    #[error("{0}")]
    Unauthenticated(String),
    /// Bad request with invalid input.
    #[error("{0}")]
    InvalidArgument(String),
    /// Requested resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Caller identity does not grant access.
    #[error("{0}")]
    PermissionDenied(String),
    /// Storage backend unavailable or degraded.
    #[error("{0}")]
    Unavailable(String),
    /// Internal server error; the message is generic.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::InvalidArgument(_) => "invalid-argument",
            AppError::NotFound(_) => "not-found",
            AppError::PermissionDenied(_) => "permission-denied",
            AppError::Unavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated(message) => AppError::Unauthenticated(message),
            ServiceError::InvalidArgument(message) => AppError::InvalidArgument(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::PermissionDenied(message) => AppError::PermissionDenied(message),
            ServiceError::Degraded => AppError::Unavailable("storage unavailable".into()),
            ServiceError::Conflict(source) => {
                error!(error = %source, "transaction retries exhausted");
                AppError::Internal("internal error".into())
            }
            ServiceError::Internal(source) => {
                error!(error = %source, "service operation failed");
                AppError::Internal("internal error".into())
            }
        }
    }
}

/// Error payload returned by every failing endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable failure kind.
    code: String,
    /// Human-readable description.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let payload = Json(ErrorBody {
            code: self.code().into(),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
