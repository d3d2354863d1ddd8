//! PostgreSQL repository backend for BuildTrack.
//!
//! Entities are stored as JSONB documents in a single `buildtrack.entity`
//! table keyed by `(kind, id)`, with the audit columns the read paths filter
//! on copied into real columns.
//!
//! # Example
//!
//! ```ignore
//! use buildtrack_core::{Repository, User};
//! use buildtrack_db_postgres::{PostgresBackend, PostgresConfig};
//!
//! let backend = PostgresBackend::new(PostgresConfig::new("postgres://localhost/buildtrack")).await?;
//! let users = backend.repository::<User>();
//! let all = users.list().await?;
//! ```

mod config;
mod error;
pub mod migrations;
mod pool;
mod repository;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use pool::{
    APPLICATION_NAME, PgPoolOptions, SCHEMA, connect_options, create_pool, mask_password,
    pool_options,
};
pub use repository::PgRepository;

use std::sync::Arc;

use buildtrack_core::{DynRepository, Entity};
use sqlx_postgres::PgPool;

/// Connected backend: the pool plus typed repositories over it.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect and, if configured, run migrations.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        config.validate().map_err(PostgresError::config)?;
        let pool = create_pool(&config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn repository<T: Entity>(&self) -> DynRepository<T> {
        Arc::new(PgRepository::<T>::new(self.pool.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
