//! In-memory repository backend for BuildTrack.
//!
//! Rows live in a papaya lock-free map keyed by id. Used for single-node
//! development and as the repository behind service tests.
//!
//! # Example
//!
//! ```ignore
//! use buildtrack_core::{Repository, Vehicle};
//! use buildtrack_db_memory::InMemoryRepository;
//!
//! let repo = InMemoryRepository::<Vehicle>::new();
//! let stored = repo.insert(vehicle).await?;
//! ```

mod repository;

pub use repository::InMemoryRepository;

use std::sync::Arc;

use buildtrack_core::{DynRepository, Entity};

/// Creates a new shareable in-memory repository for `T`.
pub fn create_repository<T: Entity>() -> DynRepository<T> {
    Arc::new(InMemoryRepository::<T>::new())
}
