//! Business services that read through and invalidate the cache.
//!
//! Reads go `CacheStore` → repository and repopulate the cache on miss.
//! Writes go to the repository first, then submit an [`InvalidationPlan`]
//! covering the row's key families and its dependents.

mod admin;
mod cache_admin;
mod construction_log;
mod project;
mod roles;
mod vehicle;

pub use admin::{AdminService, NewUser, UserUpdate};
pub use cache_admin::CacheAdminService;
pub use construction_log::ConstructionLogService;
pub use project::ProjectService;
pub use roles::RoleGuard;
pub use vehicle::{VehicleSearch, VehicleService};

use std::sync::Arc;

use buildtrack_cache::{CacheStore, InvalidationPlan, InvalidationQueue};
use buildtrack_core::{Entity, EntityKind, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl ServiceError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::NotAllowed(message.into())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Storage(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Cache store plus the queue that executes invalidation plans.
#[derive(Clone)]
pub struct ServiceCache {
    store: Arc<CacheStore>,
    queue: Arc<InvalidationQueue>,
}

impl ServiceCache {
    pub fn new(store: Arc<CacheStore>, queue: Arc<InvalidationQueue>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<InvalidationQueue> {
        &self.queue
    }

    /// Submit the plan for a write to `entity`. Never blocks.
    pub fn invalidate<T: Entity>(&self, entity: &T) {
        self.queue.submit(InvalidationPlan::for_entity(entity));
    }

    pub fn submit(&self, plan: InvalidationPlan) {
        self.queue.submit(plan);
    }
}

/// Repository lookup that maps a missing row to `NotFound`.
pub(crate) async fn require<T: Entity>(
    repo: &dyn buildtrack_core::Repository<T>,
    id: i64,
) -> ServiceResult<T> {
    repo.get(id)
        .await?
        .ok_or_else(|| ServiceError::not_found(T::KIND, id))
}
