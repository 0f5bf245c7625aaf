//! Repository trait definitions

use async_trait::async_trait;

use crate::errors::RepositoryResult;

/// Core repository trait providing CRUD operations
///
/// # Type Parameters
///
/// * `T` - The entity type (e.g., TranscodingProfile)
/// * `ID` - The identifier type (usually Uuid)
#[async_trait]
pub trait Repository<T, ID: Send + 'static>: Send + Sync {
    /// Request type for creating new entities
    type CreateRequest: Send + 'static;
    /// Request type for updating existing entities
    type UpdateRequest: Send + 'static;
    /// Query type for filtering and searching
    type Query: Send + 'static;

    /// Find an entity by its ID
    ///
    /// * `Ok(Some(T))` - Entity found
    /// * `Ok(None)` - Entity not found
    async fn find_by_id(&self, id: ID) -> RepositoryResult<Option<T>>;

    /// Find multiple entities based on a query
    async fn find_all(&self, query: Self::Query) -> RepositoryResult<Vec<T>>;

    /// Create a new entity
    async fn create(&self, request: Self::CreateRequest) -> RepositoryResult<T>;

    /// Update an existing entity, `RecordNotFound` if it does not exist
    async fn update(&self, id: ID, request: Self::UpdateRequest) -> RepositoryResult<T>;

    /// Delete an entity by ID, `RecordNotFound` if it does not exist
    async fn delete(&self, id: ID) -> RepositoryResult<()>;
}
