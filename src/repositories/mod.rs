//! Repository pattern implementation for data access
//!
//! Every write that can race with another writer is a single-row conditional
//! `UPDATE`; the affected row count tells the caller whether it won.

pub mod job;
pub mod profile;
pub mod stream;
pub mod traits;

pub use job::JobRepository;
pub use profile::{ProfileQuery, ProfileRepository};
pub use stream::StreamRepository;
pub use traits::Repository;

use crate::errors::RepositoryError;
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(value)
        .map_err(|e| RepositoryError::serialization(format!("invalid uuid '{}': {}", value, e)))
}

pub(crate) fn parse_enum<T: std::str::FromStr<Err = String>>(
    value: &str,
) -> Result<T, RepositoryError> {
    value.parse::<T>().map_err(RepositoryError::serialization)
}
