//! Process-wide reference-data snapshot.
//!
//! A [`ReferenceSnapshot`] holds every live row of one entity type in memory,
//! most recently updated first. Readers take the current collection with a
//! single atomic load; writers build a new collection and swap it in, so a
//! reader sees either the old or the new collection and never a mix.
//!
//! ```text
//! Uninitialized ──ensure_loaded──► Loading ──► Ready
//!       ▲                                        │
//!       └──────────────── invalidate ────────────┘
//! ```
//!
//! [`ReferenceSnapshot::reload`] on a `Ready` snapshot fetches in the
//! background of readers and swaps the result in without leaving `Ready`.

use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use buildtrack_core::{DynRepository, Entity, StorageError, User};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// A row that can live in a [`ReferenceSnapshot`].
pub trait SnapshotRecord: Clone + Send + Sync + 'static {
    /// Identity; the snapshot holds at most one record per key.
    fn key(&self) -> i64;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn is_deleted(&self) -> bool;
}

impl<T: Entity> SnapshotRecord for T {
    fn key(&self) -> i64 {
        self.id()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        Entity::updated_at(self)
    }

    fn is_deleted(&self) -> bool {
        Entity::is_deleted(self)
    }
}

/// Where a snapshot loads its rows from.
#[async_trait]
pub trait SnapshotSource<T>: Send + Sync {
    /// Every live row.
    async fn load_all(&self) -> Result<Vec<T>, StorageError>;

    /// One row by key, `None` if it no longer exists.
    async fn load_one(&self, key: i64) -> Result<Option<T>, StorageError>;
}

/// [`SnapshotSource`] over a repository.
pub struct RepositorySource<T: Entity> {
    repo: DynRepository<T>,
}

impl<T: Entity> RepositorySource<T> {
    pub fn new(repo: DynRepository<T>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<T: Entity> SnapshotSource<T> for RepositorySource<T> {
    async fn load_all(&self) -> Result<Vec<T>, StorageError> {
        self.repo.list().await
    }

    async fn load_one(&self, key: i64) -> Result<Option<T>, StorageError> {
        self.repo.get(key).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SnapshotState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
}

impl SnapshotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

pub struct ReferenceSnapshot<T: SnapshotRecord> {
    name: &'static str,
    records: ArcSwap<Vec<T>>,
    state: AtomicU8,
    /// Serializes full loads and upserts; never taken on the read path.
    gate: Mutex<()>,
    loads: AtomicU64,
    source: Arc<dyn SnapshotSource<T>>,
}

/// The user table snapshot used for role checks.
pub type UserSnapshot = ReferenceSnapshot<User>;

impl<T: SnapshotRecord> ReferenceSnapshot<T> {
    pub fn new(name: &'static str, source: Arc<dyn SnapshotSource<T>>) -> Self {
        Self {
            name,
            records: ArcSwap::from_pointee(Vec::new()),
            state: AtomicU8::new(SnapshotState::Uninitialized as u8),
            gate: Mutex::new(()),
            loads: AtomicU64::new(0),
            source,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> SnapshotState {
        SnapshotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SnapshotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Number of full loads performed so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Load the snapshot unless it is already loaded.
    ///
    /// Concurrent first callers wait for the one load in flight instead of
    /// issuing their own.
    pub async fn ensure_loaded(&self) -> Result<(), StorageError> {
        if self.state() == SnapshotState::Ready {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        if self.state() == SnapshotState::Ready {
            return Ok(());
        }
        self.load_locked().await
    }

    /// Current collection, loading it first if needed.
    pub async fn records(&self) -> Result<Arc<Vec<T>>, StorageError> {
        self.ensure_loaded().await?;
        Ok(self.records.load_full())
    }

    /// Current collection without triggering a load.
    pub fn current(&self) -> Arc<Vec<T>> {
        self.records.load_full()
    }

    pub fn find(&self, key: i64) -> Option<T> {
        self.records.load().iter().find(|r| r.key() == key).cloned()
    }

    /// Refresh one record from the source.
    ///
    /// The record is dropped when it no longer exists or is soft-deleted.
    /// Before the first load this is a no-op: that load reads fresh rows.
    pub async fn upsert(&self, key: i64) -> Result<(), StorageError> {
        let _gate = self.gate.lock().await;
        if self.state() != SnapshotState::Ready {
            debug!(snapshot = self.name, key, "snapshot not loaded, upsert deferred");
            return Ok(());
        }

        let fresh = self
            .source
            .load_one(key)
            .await?
            .filter(|row| !row.is_deleted());
        let present = fresh.is_some();

        self.records.rcu(|current| {
            let mut next: Vec<T> = current.iter().filter(|r| r.key() != key).cloned().collect();
            if let Some(row) = &fresh {
                next.push(row.clone());
            }
            sort_records(&mut next);
            next
        });

        debug!(snapshot = self.name, key, present, "snapshot record upserted");
        Ok(())
    }

    /// Mark the snapshot stale; the next read reloads it. Readers keep
    /// seeing the old collection until then.
    pub fn invalidate(&self) {
        self.set_state(SnapshotState::Uninitialized);
    }

    /// Force a full load now.
    ///
    /// A loaded snapshot stays `Ready` and keeps serving its current
    /// collection while the new one is fetched; a failed reload leaves it
    /// untouched.
    pub async fn reload(&self) -> Result<(), StorageError> {
        let _gate = self.gate.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<(), StorageError> {
        let serving = self.state() == SnapshotState::Ready;
        if !serving {
            self.set_state(SnapshotState::Loading);
        }
        let started = Instant::now();
        match self.source.load_all().await {
            Ok(mut rows) => {
                rows.retain(|row| !row.is_deleted());
                sort_records(&mut rows);
                dedup_by_key(&mut rows);
                let count = rows.len();
                self.records.store(Arc::new(rows));
                self.loads.fetch_add(1, Ordering::SeqCst);
                self.set_state(SnapshotState::Ready);
                counter!("buildtrack_snapshot_loads_total", "snapshot" => self.name).increment(1);
                histogram!("buildtrack_snapshot_load_duration_seconds", "snapshot" => self.name)
                    .record(started.elapsed().as_secs_f64());
                gauge!("buildtrack_snapshot_records", "snapshot" => self.name).set(count as f64);
                info!(snapshot = self.name, count, "reference snapshot loaded");
                Ok(())
            }
            Err(e) => {
                if !serving {
                    self.set_state(SnapshotState::Uninitialized);
                }
                counter!("buildtrack_snapshot_load_failures_total", "snapshot" => self.name)
                    .increment(1);
                error!(snapshot = self.name, error = %e, "reference snapshot load failed");
                Err(e)
            }
        }
    }
}

fn sort_records<T: SnapshotRecord>(rows: &mut [T]) {
    rows.sort_by_key(|row| (Reverse(row.updated_at()), row.key()));
}

/// Keep the first (most recent) record per key.
fn dedup_by_key<T: SnapshotRecord>(rows: &mut Vec<T>) {
    let mut seen = std::collections::HashSet::with_capacity(rows.len());
    rows.retain(|row| seen.insert(row.key()));
}

impl<T: SnapshotRecord> std::fmt::Debug for ReferenceSnapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSnapshot")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("records", &self.records.load().len())
            .field("loads", &self.load_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use buildtrack_core::EntityMeta;
    use chrono::TimeZone;

    fn user(id: i64, day: u32) -> User {
        let stamp = Utc.with_ymd_and_hms(2025, 3, day, 8, 0, 0).unwrap();
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            password_hash: String::new(),
            role: "User".into(),
            is_verify: true,
            meta: EntityMeta {
                created_at: Some(stamp),
                updated_at: Some(stamp),
                ..Default::default()
            },
        }
    }

    /// Source over a mutable row map that counts calls.
    #[derive(Default)]
    struct CountingSource {
        rows: std::sync::Mutex<HashMap<i64, User>>,
        full_loads: AtomicUsize,
        delay: Duration,
        fail: std::sync::atomic::AtomicBool,
    }

    impl CountingSource {
        fn with(rows: Vec<User>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                rows: std::sync::Mutex::new(rows.into_iter().map(|u| (u.id, u)).collect()),
                delay,
                ..Default::default()
            })
        }

        fn put(&self, row: User) {
            self.rows.lock().unwrap().insert(row.id, row);
        }
    }

    #[async_trait]
    impl SnapshotSource<User> for CountingSource {
        async fn load_all(&self) -> Result<Vec<User>, StorageError> {
            self.full_loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::connection_error("database down"));
            }
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }

        async fn load_one(&self, key: i64) -> Result<Option<User>, StorageError> {
            Ok(self.rows.lock().unwrap().get(&key).cloned())
        }
    }

    #[tokio::test]
    async fn first_read_loads_sorted_records() {
        let source = CountingSource::with(vec![user(1, 1), user(2, 3), user(3, 2)], Duration::ZERO);
        let snapshot = UserSnapshot::new("users", source.clone());
        assert_eq!(snapshot.state(), SnapshotState::Uninitialized);
        assert!(snapshot.current().is_empty());

        let records = snapshot.records().await.unwrap();
        let ids: Vec<_> = records.iter().map(|u| u.id).collect();
        assert_eq!(ids, [2, 3, 1]);
        assert_eq!(snapshot.state(), SnapshotState::Ready);

        snapshot.records().await.unwrap();
        assert_eq!(snapshot.load_count(), 1);
        assert_eq!(source.full_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_reads_load_once() {
        let source = CountingSource::with(
            vec![user(1, 1), user(2, 2), user(3, 3)],
            Duration::from_millis(50),
        );
        let snapshot = Arc::new(UserSnapshot::new("users", source.clone()));

        let readers: Vec<_> = (0..32)
            .map(|_| {
                let snapshot = snapshot.clone();
                tokio::spawn(async move { snapshot.records().await.unwrap().len() })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 3);
        }

        assert_eq!(source.full_loads.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.load_count(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_stale_record_and_moves_it_first() {
        let source = CountingSource::with(
            vec![user(42, 1), user(7, 5), user(8, 4)],
            Duration::ZERO,
        );
        let snapshot = UserSnapshot::new("users", source.clone());
        snapshot.ensure_loaded().await.unwrap();
        assert_eq!(snapshot.current().last().unwrap().id, 42);

        let mut fresh = user(42, 9);
        fresh.role = "Executive Board".into();
        source.put(fresh.clone());

        snapshot.upsert(42).await.unwrap();
        snapshot.upsert(42).await.unwrap();

        let records = snapshot.current();
        assert_eq!(records.iter().filter(|u| u.id == 42).count(), 1);
        assert_eq!(records[0], fresh);
        assert_eq!(records.len(), 3);
        assert_eq!(snapshot.find(42).unwrap().role, "Executive Board");
        assert_eq!(snapshot.load_count(), 1);
    }

    #[tokio::test]
    async fn upsert_drops_deleted_and_adds_new_records() {
        let source = CountingSource::with(vec![user(1, 1), user(2, 2)], Duration::ZERO);
        let snapshot = UserSnapshot::new("users", source.clone());
        snapshot.ensure_loaded().await.unwrap();

        let mut gone = user(1, 3);
        gone.meta.deleted = true;
        source.put(gone);
        snapshot.upsert(1).await.unwrap();
        assert!(snapshot.find(1).is_none());

        source.put(user(3, 4));
        snapshot.upsert(3).await.unwrap();
        let ids: Vec<_> = snapshot.current().iter().map(|u| u.id).collect();
        assert_eq!(ids, [3, 2]);

        snapshot.upsert(99).await.unwrap();
        assert_eq!(snapshot.current().len(), 2);
    }

    #[tokio::test]
    async fn upsert_before_first_load_is_deferred() {
        let source = CountingSource::with(vec![user(1, 1)], Duration::ZERO);
        let snapshot = UserSnapshot::new("users", source.clone());

        snapshot.upsert(1).await.unwrap();
        assert_eq!(snapshot.state(), SnapshotState::Uninitialized);
        assert!(snapshot.current().is_empty());
        assert_eq!(snapshot.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_and_reload_fetch_again() {
        let source = CountingSource::with(vec![user(1, 1)], Duration::ZERO);
        let snapshot = UserSnapshot::new("users", source.clone());
        snapshot.ensure_loaded().await.unwrap();

        source.put(user(2, 2));
        snapshot.invalidate();
        assert_eq!(snapshot.state(), SnapshotState::Uninitialized);
        // Old collection stays readable until the reload lands.
        assert_eq!(snapshot.current().len(), 1);
        assert_eq!(snapshot.records().await.unwrap().len(), 2);

        snapshot.reload().await.unwrap();
        assert_eq!(snapshot.load_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_keeps_serving_current_records() {
        let source = CountingSource::with(vec![user(1, 1)], Duration::from_millis(200));
        let snapshot = Arc::new(UserSnapshot::new("users", source.clone()));
        snapshot.ensure_loaded().await.unwrap();
        source.put(user(2, 2));

        let reload = tokio::spawn({
            let snapshot = snapshot.clone();
            async move { snapshot.reload().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Mid-reload reads return the old collection without waiting.
        assert_eq!(snapshot.state(), SnapshotState::Ready);
        let during = tokio::time::timeout(Duration::from_millis(50), snapshot.records())
            .await
            .expect("read blocked on reload")
            .unwrap();
        assert_eq!(during.len(), 1);

        reload.await.unwrap().unwrap();
        assert_eq!(snapshot.current().len(), 2);
        assert_eq!(snapshot.load_count(), 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_records() {
        let source = CountingSource::with(vec![user(1, 1), user(2, 2)], Duration::ZERO);
        let snapshot = UserSnapshot::new("users", source.clone());
        snapshot.ensure_loaded().await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        assert!(snapshot.reload().await.is_err());
        assert_eq!(snapshot.state(), SnapshotState::Ready);
        assert_eq!(snapshot.current().len(), 2);
        assert_eq!(snapshot.load_count(), 1);
    }

    #[tokio::test]
    async fn failed_load_leaves_snapshot_uninitialized() {
        let source = CountingSource::with(vec![user(1, 1)], Duration::ZERO);
        source.fail.store(true, Ordering::SeqCst);
        let snapshot = UserSnapshot::new("users", source.clone());

        assert!(snapshot.records().await.is_err());
        assert_eq!(snapshot.state(), SnapshotState::Uninitialized);
        assert_eq!(snapshot.load_count(), 0);

        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(snapshot.records().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_a_torn_collection() {
        let rows: Vec<User> = (1..=50).map(|id| user(id, 1 + (id as u32 % 20))).collect();
        let source = CountingSource::with(rows, Duration::ZERO);
        let snapshot = Arc::new(UserSnapshot::new("users", source.clone()));
        snapshot.ensure_loaded().await.unwrap();

        let writer = {
            let snapshot = snapshot.clone();
            let source = source.clone();
            tokio::spawn(async move {
                for round in 0..200u32 {
                    let id = i64::from(round % 50) + 1;
                    source.put(user(id, 1 + round % 28));
                    snapshot.upsert(id).await.unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let snapshot = snapshot.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let records = snapshot.current();
                        assert_eq!(records.len(), 50);
                        let mut ids: Vec<_> = records.iter().map(|u| u.id).collect();
                        ids.sort_unstable();
                        ids.dedup();
                        assert_eq!(ids.len(), 50);
                        assert!(
                            records
                                .windows(2)
                                .all(|w| w[0].meta.updated_at >= w[1].meta.updated_at)
                        );
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
