//! HTTP response helpers and error mapping
//!
//! Successful API calls return the resource itself as JSON. Failures return
//! an [`ErrorResponse`] with a status derived from the error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::{AppError, AppResult, RepositoryError, TranscodingError};

/// Error body returned by every API route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    pub fn new(message: String) -> Self {
        Self {
            success: false,
            error: message,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Convert AppResult to HTTP response
pub fn handle_result<T: Serialize>(result: AppResult<T>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(error) => handle_error(error),
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let (status, message) = match &error {
        AppError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone()),
        AppError::NotFound { resource, id } => (
            StatusCode::NOT_FOUND,
            format!("{} with id '{}' not found", resource, id),
        ),
        AppError::PermissionDenied { action, resource } => (
            StatusCode::FORBIDDEN,
            format!("Permission denied: {} on {}", action, resource),
        ),
        AppError::Repository(e) => repository_status(e),
        AppError::Transcoding(e) => transcoding_status(e),
        AppError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Database operation failed".to_string(),
        ),
        AppError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {}", message),
        ),
    };

    if status.is_server_error() {
        error!("Request failed: {}", error);
    }

    (status, Json(ErrorResponse::new(message))).into_response()
}

fn repository_status(error: &RepositoryError) -> (StatusCode, String) {
    match error {
        RepositoryError::RecordNotFound { table, value, .. } => (
            StatusCode::NOT_FOUND,
            format!("{} with id '{}' not found", table, value),
        ),
        RepositoryError::ConstraintViolation { message, .. } => {
            (StatusCode::CONFLICT, message.clone())
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Data access failed".to_string(),
        ),
    }
}

fn transcoding_status(error: &TranscodingError) -> (StatusCode, String) {
    match error {
        TranscodingError::InvalidInput(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        TranscodingError::StreamNotFound(id) => (
            StatusCode::NOT_FOUND,
            format!("stream with id '{}' not found", id),
        ),
        TranscodingError::NoProfiles => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
        TranscodingError::NoRenditionsReady(_) | TranscodingError::AlreadyRunning { .. } => {
            (StatusCode::CONFLICT, error.to_string())
        }
        TranscodingError::Repository(e) => repository_status(e),
        TranscodingError::SpawnFailure(_) | TranscodingError::ManifestWrite(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Transcoding operation failed".to_string(),
        ),
    }
}

/// Success response helpers
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

pub fn accepted<T: Serialize>(data: T) -> Response {
    (StatusCode::ACCEPTED, Json(data)).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
