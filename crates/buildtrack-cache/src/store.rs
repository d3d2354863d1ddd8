//! Two-tier cache store: fast in-process tier (L1) + distributed tier (L2).
//!
//! ## Lookup order
//!
//! ```text
//! get(key, use_fast_tier) → L1 (if requested) → L2 → None
//! ```
//!
//! An L2 hit is promoted into L1 when the caller asked for the fast tier.
//! Without a distributed tier the fast tier holds everything.
//!
//! ## Failure policy
//!
//! Nothing here returns an error. Backend failures are logged, counted and
//! turned into a miss or a no-op, so a dead Redis never fails a request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::config::CacheSettings;
use crate::connection::RedisConnection;
use crate::fast::FastTier;
use crate::metrics;
use crate::pubsub::{ChangeEvent, ChangePublisher};
use crate::tier::{DistributedTier, RedisTier};

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub fast_entries: usize,
    pub mode: String,
}

pub struct CacheStore {
    fast: FastTier,
    distributed: Option<Arc<dyn DistributedTier>>,
    settings: CacheSettings,
    publisher: Option<Arc<dyn ChangePublisher>>,
}

impl CacheStore {
    pub fn new(settings: CacheSettings, distributed: Option<Arc<dyn DistributedTier>>) -> Self {
        Self {
            fast: FastTier::new(settings.fast_tier_max_entries),
            distributed,
            settings,
            publisher: None,
        }
    }

    /// Store with the fast tier only.
    pub fn local(settings: CacheSettings) -> Self {
        Self::new(settings, None)
    }

    /// Store over the shared Redis connection, or fast tier only when Redis
    /// is disabled.
    pub fn from_connection(settings: CacheSettings, conn: Option<RedisConnection>) -> Self {
        let distributed = conn.map(|c| Arc::new(RedisTier::new(c)) as Arc<dyn DistributedTier>);
        Self::new(settings, distributed)
    }

    /// Broadcast fast-tier evictions to peer instances through `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn ChangePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn fast_tier(&self) -> &FastTier {
        &self.fast
    }

    pub fn physical_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    fn logical_key<'a>(&self, physical: &'a str) -> &'a str {
        physical
            .strip_prefix(self.settings.key_prefix.as_str())
            .unwrap_or(physical)
    }

    /// Typed lookup. A payload that does not decode as `T` counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, use_fast_tier: bool) -> Option<T> {
        self.get_typed(key, use_fast_tier, None).await
    }

    /// The stored text as is; empty on miss.
    pub async fn get_string(&self, key: &str, use_fast_tier: bool) -> String {
        self.get_raw(key, use_fast_tier, None)
            .await
            .map(|raw| raw.to_string())
            .unwrap_or_default()
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        key: &str,
        use_fast_tier: bool,
        ttl: Option<Duration>,
    ) -> Option<T> {
        let raw = self.get_raw(key, use_fast_tier, ttl).await?;
        match codec::decode(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached value has unexpected shape");
                metrics::record_cache_error("decode");
                None
            }
        }
    }

    /// `ttl` caps how long a promoted L1 copy may live.
    async fn get_raw(
        &self,
        key: &str,
        use_fast_tier: bool,
        ttl: Option<Duration>,
    ) -> Option<Arc<str>> {
        if use_fast_tier || self.distributed.is_none() {
            if let Some(data) = self.fast.get(key) {
                tracing::debug!(key = %key, "cache hit (L1)");
                metrics::record_cache_hit("L1");
                return Some(data);
            }
        }

        let Some(tier) = &self.distributed else {
            tracing::debug!(key = %key, "cache miss");
            metrics::record_cache_miss();
            return None;
        };

        let physical = self.physical_key(key);
        match tier.get(&physical).await {
            Ok(Some(raw)) => {
                tracing::debug!(key = %key, "cache hit (L2)");
                metrics::record_cache_hit("L2");
                let data: Arc<str> = raw.into();
                if use_fast_tier {
                    self.promote(tier.as_ref(), key, &physical, Arc::clone(&data), ttl)
                        .await;
                }
                Some(data)
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                metrics::record_cache_miss();
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "distributed cache GET error");
                metrics::record_cache_error("get");
                metrics::record_cache_miss();
                None
            }
        }
    }

    /// Copy an L2 hit into L1 for no longer than the L2 entry has left, so
    /// the copy never outlives the TTL it was written with.
    async fn promote(
        &self,
        tier: &dyn DistributedTier,
        key: &str,
        physical: &str,
        data: Arc<str>,
        ttl: Option<Duration>,
    ) {
        let remaining = match tier.ttl(physical).await {
            Ok(Some(left)) => left,
            Ok(None) => ttl.unwrap_or_else(|| self.settings.default_ttl()),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "distributed cache PTTL error, not promoting");
                metrics::record_cache_error("ttl");
                return;
            }
        };
        let lifetime = ttl.map_or(remaining, |cap| cap.min(remaining));
        if lifetime.is_zero() {
            return;
        }
        self.fast.insert(key, data, lifetime);
    }

    /// Store `value` under `key` for `ttl` (default TTL when `None`).
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        also_fast_tier: bool,
    ) {
        let raw = match codec::encode(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize cache value");
                metrics::record_cache_error("encode");
                return;
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.settings.default_ttl());

        if also_fast_tier || self.distributed.is_none() {
            self.fast.insert(key, raw.as_str(), ttl);
        } else {
            self.fast.remove(key);
        }

        if let Some(tier) = &self.distributed {
            match tier.set(&self.physical_key(key), &raw, ttl).await {
                Ok(()) => {
                    tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "distributed cache SET error");
                    metrics::record_cache_error("set");
                }
            }
        }
    }

    /// Remove `key` from both tiers. Deleting a missing key is a no-op.
    pub async fn delete(&self, key: &str) {
        self.delete_quiet(key).await;
        self.publish(ChangeEvent::evict_fast_tier(key)).await;
    }

    async fn delete_quiet(&self, key: &str) {
        self.fast.remove(key);
        metrics::record_invalidation("key");

        if let Some(tier) = &self.distributed {
            if let Err(e) = tier.delete(&self.physical_key(key)).await {
                tracing::warn!(key = %key, error = %e, "distributed cache DEL error");
                metrics::record_cache_error("delete");
            }
        }
    }

    /// Delete each key independently; one failure does not stop the rest.
    pub async fn delete_many<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.delete(key.as_ref()).await;
        }
    }

    /// Delete every key matching `pattern` (a trailing `*` is implied).
    ///
    /// Keys are enumerated with SCAN and deleted one by one, so this is not
    /// atomic: a key written between enumeration and deletion survives until
    /// its TTL. When the distributed tier cannot be reached only the fast
    /// tier is swept.
    pub async fn delete_by_pattern(&self, pattern: &str) {
        let logical = if pattern.ends_with('*') {
            pattern.to_string()
        } else {
            format!("{pattern}*")
        };
        metrics::record_invalidation("pattern");

        if let Some(tier) = &self.distributed {
            let physical = self.physical_key(&logical);
            match tier.scan_keys(&physical).await {
                Ok(keys) => {
                    tracing::debug!(pattern = %logical, count = keys.len(), "deleting keys by pattern");
                    for key in &keys {
                        if let Err(e) = tier.delete(key).await {
                            tracing::warn!(key = %key, error = %e, "distributed cache DEL error");
                            metrics::record_cache_error("delete");
                        }
                        self.fast.remove(self.logical_key(key));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        pattern = %logical,
                        error = %e,
                        "distributed cache unavailable, sweeping fast tier only"
                    );
                    metrics::record_cache_error("scan");
                }
            }
        }

        let swept = self.fast.remove_matching(&logical);
        if swept > 0 {
            tracing::debug!(pattern = %logical, count = swept, "swept fast tier");
        }

        self.publish(ChangeEvent::evict_fast_tier_pattern(&logical))
            .await;
    }

    /// Read-through helper on the distributed tier.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_load_with(key, ttl, false, loader).await
    }

    /// Read-through: return the cached value, or run `loader`, cache its
    /// result and return it. Loader errors propagate and are not cached.
    pub async fn get_or_load_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        use_fast_tier: bool,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_typed::<T>(key, use_fast_tier, ttl).await {
            return Ok(hit);
        }
        let value = loader().await?;
        self.set(key, &value, ttl, use_fast_tier).await;
        Ok(value)
    }

    /// Whether the distributed tier answers right now.
    pub async fn is_distributed_available(&self) -> bool {
        match &self.distributed {
            Some(tier) => tier.is_available().await,
            None => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let fast_entries = self.fast.len();
        metrics::set_cache_entries("L1", fast_entries);
        CacheStats {
            fast_entries,
            mode: self
                .distributed
                .as_ref()
                .map_or("local", |tier| tier.name())
                .to_string(),
        }
    }

    async fn publish(&self, event: ChangeEvent) {
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&event).await {
                tracing::warn!(error = %e, kind = ?event.kind, "failed to publish fast-tier eviction");
            }
        }
    }
}
