use std::sync::Arc;

use buildtrack_cache::{CacheStats, CacheStore};
use tracing::info;

/// Cache families derived from construction data. Progress items, the
/// dashboard and statistics have no entity of their own.
const CONSTRUCTION_DATA_PATTERNS: [&str; 6] = [
    "CONSTRUCTION_PROGRESS:*",
    "CONSTRUCTION_LOG:*",
    "INSPECTION_REPORT:*",
    "ConstructionProgressItem:*",
    "DASHBOARD:*",
    "STATISTICS:*",
];

/// Manual cache maintenance.
pub struct CacheAdminService {
    store: Arc<CacheStore>,
}

impl CacheAdminService {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Drop every key under this deployment's prefix.
    pub async fn clear_all(&self) {
        self.store.delete_by_pattern("*").await;
        info!("all cache entries cleared");
    }

    pub async fn clear_construction_data(&self) {
        for pattern in CONSTRUCTION_DATA_PATTERNS {
            self.store.delete_by_pattern(pattern).await;
        }
        info!(
            patterns = CONSTRUCTION_DATA_PATTERNS.len(),
            "construction cache entries cleared"
        );
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildtrack_cache::{CacheSettings, MemoryTier};

    async fn seeded() -> (CacheAdminService, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::new(
            CacheSettings::default(),
            Some(Arc::new(MemoryTier::new())),
        ));
        for key in [
            "CONSTRUCTION_LOG:ID:1",
            "CONSTRUCTION_PROGRESS:PROJECT:2",
            "DASHBOARD:7",
            "STATISTICS:2025",
            "PROJECT:ID:2",
            "USER:LIST",
        ] {
            store.set(key, &1, None, true).await;
        }
        (CacheAdminService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn clear_construction_data_keeps_other_families() {
        let (admin, store) = seeded().await;
        admin.clear_construction_data().await;

        for gone in [
            "CONSTRUCTION_LOG:ID:1",
            "CONSTRUCTION_PROGRESS:PROJECT:2",
            "DASHBOARD:7",
            "STATISTICS:2025",
        ] {
            assert_eq!(store.get::<i32>(gone, true).await, None, "{gone}");
        }
        assert_eq!(store.get::<i32>("PROJECT:ID:2", true).await, Some(1));
        assert_eq!(store.get::<i32>("USER:LIST", false).await, Some(1));
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let (admin, store) = seeded().await;
        admin.clear_all().await;

        assert_eq!(admin.stats().fast_entries, 0);
        assert_eq!(store.get::<i32>("USER:LIST", false).await, None);
        // Idempotent.
        admin.clear_all().await;
    }
}
