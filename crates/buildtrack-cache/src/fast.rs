//! In-process fast tier (L1).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::tier::glob_match;

/// A cached entry with TTL support.
///
/// The payload is shared, so hits clone a pointer rather than the JSON text.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<str>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: impl Into<Arc<str>>, ttl: Duration) -> Self {
        Self {
            data: data.into(),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Per-instance L1 keyed by logical (unprefixed) key.
///
/// No LRU: entries leave on TTL expiry or explicit eviction. Once
/// `max_entries` is reached, expired entries are purged and further inserts
/// of new keys are dropped until room frees up.
#[derive(Clone)]
pub struct FastTier {
    map: Arc<DashMap<String, CachedEntry>>,
    max_entries: usize,
}

impl FastTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        if let Some(entry) = self.map.get(key) {
            if !entry.is_expired() {
                return Some(Arc::clone(&entry.data));
            }
        }
        // A concurrent insert may have replaced the expired entry.
        self.map.remove_if(key, |_, entry| entry.is_expired());
        None
    }

    pub fn insert(&self, key: &str, data: impl Into<Arc<str>>, ttl: Duration) {
        if self.map.len() >= self.max_entries && !self.map.contains_key(key) {
            self.purge_expired();
            if self.map.len() >= self.max_entries {
                tracing::debug!(key = %key, max = self.max_entries, "fast tier full, skipping insert");
                return;
            }
        }
        self.map.insert(key.to_string(), CachedEntry::new(data, ttl));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove every key matching the glob `pattern`. Returns the count removed.
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let before = self.map.len();
        self.map.retain(|key, _| !glob_match(pattern, key));
        before.saturating_sub(self.map.len())
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.map.len())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_misses() {
        let tier = FastTier::new(16);
        tier.insert("VEHICLE:ID:1", "{}", Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(tier.get("VEHICLE:ID:1").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn expired_read_keeps_concurrent_replacement() {
        for _ in 0..50 {
            let tier = FastTier::new(16);
            tier.insert("VEHICLE:ID:1", "old", Duration::ZERO);

            std::thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..200 {
                            tier.get("VEHICLE:ID:1");
                        }
                    });
                }
                tier.insert("VEHICLE:ID:1", "new", Duration::from_secs(60));
            });

            assert_eq!(tier.get("VEHICLE:ID:1").as_deref(), Some("new"));
        }
    }

    #[test]
    fn remove_matching_uses_glob() {
        let tier = FastTier::new(16);
        let ttl = Duration::from_secs(60);
        tier.insert("PROJECT:ID:1", "1", ttl);
        tier.insert("PROJECT:LIST", "[]", ttl);
        tier.insert("PROJECTION", "x", ttl);

        assert_eq!(tier.remove_matching("PROJECT:*"), 2);
        assert!(tier.contains("PROJECTION"));
    }

    #[test]
    fn cap_rejects_new_keys_but_allows_overwrite() {
        let tier = FastTier::new(2);
        let ttl = Duration::from_secs(60);
        tier.insert("a", "1", ttl);
        tier.insert("b", "2", ttl);
        tier.insert("c", "3", ttl);
        assert!(!tier.contains("c"));

        tier.insert("a", "10", ttl);
        assert_eq!(tier.get("a").as_deref(), Some("10"));
    }
}
