//! JSONB-backed repository over `buildtrack.entity`.
//!
//! Each row stores the serialized entity in `data`; `kind`, `parent_id`,
//! `deleted` and `updated_at` are copied out of it so listing and filtering
//! never parse JSON.

use std::marker::PhantomData;

use async_trait::async_trait;
use buildtrack_core::{Entity, Repository, StorageError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::{debug, instrument};

use crate::error::PostgresError;

fn db_error(e: sqlx_core::error::Error) -> StorageError {
    PostgresError::from(e).into()
}

/// Column values derived from an entity.
struct RowColumns {
    parent_id: Option<i64>,
    deleted: bool,
    updated_at: Option<DateTime<Utc>>,
    data: Value,
}

impl RowColumns {
    fn of<T: Entity>(entity: &T) -> Result<Self, StorageError> {
        Ok(Self {
            parent_id: entity.scopes().first().map(|(_, id)| *id),
            deleted: entity.is_deleted(),
            updated_at: entity.updated_at(),
            data: serde_json::to_value(entity)?,
        })
    }
}

pub struct PgRepository<T> {
    pool: PgPool,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for PgRepository<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> PgRepository<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    /// Live rows listed under `parent_id` (the entity's first scope).
    pub async fn list_by_parent(&self, parent_id: i64) -> Result<Vec<T>, StorageError> {
        let rows: Vec<(Value,)> = query_as(
            r#"SELECT data FROM buildtrack.entity
               WHERE kind = $1 AND parent_id = $2 AND NOT deleted
               ORDER BY updated_at DESC NULLS LAST, id"#,
        )
        .bind(T::KIND.namespace())
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        decode_rows(rows)
    }

    async fn write(&self, entity: &T) -> Result<u64, StorageError> {
        let cols = RowColumns::of(entity)?;
        let result = query(
            r#"UPDATE buildtrack.entity
               SET parent_id = $3, deleted = $4, updated_at = $5, data = $6
               WHERE kind = $1 AND id = $2 AND NOT deleted"#,
        )
        .bind(T::KIND.namespace())
        .bind(entity.id())
        .bind(cols.parent_id)
        .bind(cols.deleted)
        .bind(cols.updated_at)
        .bind(&cols.data)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}

fn decode_rows<T: Entity>(rows: Vec<(Value,)>) -> Result<Vec<T>, StorageError> {
    rows.into_iter()
        .map(|(data,)| serde_json::from_value(data).map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl<T: Entity> Repository<T> for PgRepository<T> {
    #[instrument(skip(self), fields(kind = %T::KIND))]
    async fn get(&self, id: i64) -> Result<Option<T>, StorageError> {
        let row: Option<(Value,)> = query_as(
            "SELECT data FROM buildtrack.entity WHERE kind = $1 AND id = $2 AND NOT deleted",
        )
        .bind(T::KIND.namespace())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|(data,)| serde_json::from_value(data).map_err(StorageError::from))
            .transpose()
    }

    #[instrument(skip(self), fields(kind = %T::KIND))]
    async fn list(&self) -> Result<Vec<T>, StorageError> {
        let rows: Vec<(Value,)> = query_as(
            r#"SELECT data FROM buildtrack.entity
               WHERE kind = $1 AND NOT deleted
               ORDER BY updated_at DESC NULLS LAST, id"#,
        )
        .bind(T::KIND.namespace())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(count = rows.len(), "listed entities");
        decode_rows(rows)
    }

    #[instrument(skip(self, entity), fields(kind = %T::KIND))]
    async fn insert(&self, mut entity: T) -> Result<T, StorageError> {
        let id: i64 = query_scalar("SELECT nextval('buildtrack.entity_id_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        entity.set_id(id);

        let cols = RowColumns::of(&entity)?;
        query(
            r#"INSERT INTO buildtrack.entity (kind, id, parent_id, deleted, updated_at, data)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(T::KIND.namespace())
        .bind(id)
        .bind(cols.parent_id)
        .bind(cols.deleted)
        .bind(cols.updated_at)
        .bind(&cols.data)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(id, "inserted entity");
        Ok(entity)
    }

    #[instrument(skip(self, entity), fields(kind = %T::KIND, id = entity.id()))]
    async fn update(&self, entity: T) -> Result<T, StorageError> {
        if self.write(&entity).await? == 0 {
            return Err(StorageError::not_found(T::KIND, entity.id()));
        }
        Ok(entity)
    }

    #[instrument(skip(self), fields(kind = %T::KIND))]
    async fn soft_delete(&self, id: i64, actor: i64) -> Result<bool, StorageError> {
        let Some(mut entity) = self.get(id).await? else {
            return Ok(false);
        };
        entity.meta_mut().soft_delete(actor);
        Ok(self.write(&entity).await? > 0)
    }
}
