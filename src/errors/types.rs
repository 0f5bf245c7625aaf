//! Error type definitions
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system.

use thiserror::Error;
use uuid::Uuid;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Transcoding orchestration errors
    #[error("Transcoding error: {0}")]
    Transcoding(#[from] TranscodingError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Permission denied errors
    #[error("Permission denied: {action} on {resource}")]
    PermissionDenied { action: String, resource: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQL query execution failures
    #[error("Query failed: {query} - {message}")]
    QueryFailed { query: String, message: String },

    /// Data decoding failures (bad UUIDs, unknown enum values)
    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    /// Constraint violations (unique, foreign key, etc.)
    #[error("Constraint violation: {constraint} - {message}")]
    ConstraintViolation { constraint: String, message: String },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound { table: String, field: String, value: String },
}

/// Transcoding supervisor and manifest errors
#[derive(Error, Debug)]
pub enum TranscodingError {
    /// The encoder could not be started and no process handle exists
    #[error("Failed to spawn encoder: {0}")]
    SpawnFailure(String),

    /// Input rejected before any process was started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Jobs requested for a stream that does not exist
    #[error("Stream not found: {0}")]
    StreamNotFound(Uuid),

    /// An unfinished job already owns this stream's rendition for the profile
    #[error("Transcoding already running for stream {stream_id} with profile {profile}")]
    AlreadyRunning { stream_id: Uuid, profile: String },

    /// No profiles were supplied or resolved for a profile set
    #[error("No transcoding profiles available")]
    NoProfiles,

    /// Manifest requested while no rendition has output yet
    #[error("No renditions ready for stream {0}")]
    NoRenditionsReady(Uuid),

    /// Manifest could not be written to disk
    #[error("Failed to write master playlist: {0}")]
    ManifestWrite(#[from] std::io::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::RecordNotFound {
                table: "unknown".to_string(),
                field: "unknown".to_string(),
                value: "unknown".to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::ConstraintViolation {
                constraint: "unique".to_string(),
                message: db.message().to_string(),
            },
            _ => Self::QueryFailed {
                query: "unknown".to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied<A: Into<String>, R: Into<String>>(action: A, resource: R) -> Self {
        Self::PermissionDenied {
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl RepositoryError {
    /// Create a record not found error
    pub fn record_not_found<T: Into<String>, F: Into<String>, V: Into<String>>(
        table: T,
        field: F,
        value: V,
    ) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn serialization<M: Into<String>>(message: M) -> Self {
        Self::SerializationFailed {
            message: message.into(),
        }
    }
}
