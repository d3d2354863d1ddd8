//! # buildtrack-core
//!
//! Domain entities and the storage contract shared by the BuildTrack crates.
//!
//! The cache layer keys everything off [`EntityKind`]; storage backends
//! implement [`Repository`] for each [`Entity`].

mod entity;
mod error;
pub mod models;
mod repository;

pub use entity::{Entity, EntityKind, EntityMeta, Scope};
pub use error::{ErrorCategory, StorageError};
pub use models::{ConstructionLog, ConstructionLogStatus, Project, ProjectStatus, User, Vehicle};
pub use repository::{DynRepository, Repository};
