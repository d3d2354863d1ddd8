use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use buildtrack_core::{Entity, Repository, StorageError};
use papaya::HashMap as PapayaHashMap;

/// Lock-free in-memory store for one entity type.
///
/// Soft-deleted rows stay in the map with `deleted = true` and are hidden
/// from reads, mirroring the relational backend.
pub struct InMemoryRepository<T: Entity> {
    rows: Arc<PapayaHashMap<i64, T>>,
    next_id: AtomicI64,
    reads: AtomicU64,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(PapayaHashMap::new()),
            next_id: AtomicI64::new(1),
            reads: AtomicU64::new(0),
        }
    }

    /// Repository pre-filled with `rows`, keeping their ids.
    pub fn with_rows(rows: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::new();
        {
            let guard = repo.rows.pin();
            for row in rows {
                let id = row.id();
                repo.next_id.fetch_max(id + 1, Ordering::SeqCst);
                guard.insert(id, row);
            }
        }
        repo
    }

    /// Number of `get` and `list` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Total rows, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.rows.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: i64) -> Result<Option<T>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let guard = self.rows.pin();
        Ok(guard.get(&id).filter(|row| !row.is_deleted()).cloned())
    }

    async fn list(&self) -> Result<Vec<T>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<T> = {
            let guard = self.rows.pin();
            guard
                .values()
                .filter(|row| !row.is_deleted())
                .cloned()
                .collect()
        };
        rows.sort_by_key(|row| (Reverse(row.updated_at()), row.id()));
        Ok(rows)
    }

    async fn insert(&self, mut entity: T) -> Result<T, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entity.set_id(id);
        self.rows.pin().insert(id, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: T) -> Result<T, StorageError> {
        let id = entity.id();
        let guard = self.rows.pin();
        match guard.get(&id) {
            Some(existing) if !existing.is_deleted() => {
                guard.insert(id, entity.clone());
                Ok(entity)
            }
            _ => Err(StorageError::not_found(T::KIND, id)),
        }
    }

    async fn soft_delete(&self, id: i64, actor: i64) -> Result<bool, StorageError> {
        let guard = self.rows.pin();
        let Some(existing) = guard.get(&id).filter(|row| !row.is_deleted()) else {
            return Ok(false);
        };
        let mut row = existing.clone();
        row.meta_mut().soft_delete(actor);
        guard.insert(id, row);
        Ok(true)
    }
}
