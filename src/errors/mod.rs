//! Centralized error handling
//!
//! # Error Categories
//!
//! - **Database Errors**: SQLite operations, migrations, connection issues
//! - **Repository Errors**: Data access layer failures
//! - **Transcoding Errors**: encoder spawn failures, invalid inputs, manifest generation
//! - **Validation Errors**: Input validation and business rule violations
//!
//! A denied publish is not an error: the gatekeeper returns
//! [`crate::services::PublishDecision::Deny`] so the media server always gets a
//! definite answer.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Transcoding Results
pub type TranscodingResult<T> = Result<T, TranscodingError>;
