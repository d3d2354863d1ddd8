//! Repository contract implemented by every storage backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::StorageError;

/// CRUD over one entity type with soft-delete semantics.
///
/// Reads never return soft-deleted rows.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Fetch one live row by id.
    async fn get(&self, id: i64) -> Result<Option<T>, StorageError>;

    /// All live rows, most recently updated first.
    async fn list(&self) -> Result<Vec<T>, StorageError>;

    /// Insert a new row, assigning its id. Returns the stored row.
    async fn insert(&self, entity: T) -> Result<T, StorageError>;

    /// Replace an existing live row. Fails with `NotFound` otherwise.
    async fn update(&self, entity: T) -> Result<T, StorageError>;

    /// Soft-delete a live row. Returns `false` if nothing was deleted.
    async fn soft_delete(&self, id: i64, actor: i64) -> Result<bool, StorageError>;
}

/// Shareable repository handle.
pub type DynRepository<T> = Arc<dyn Repository<T>>;
