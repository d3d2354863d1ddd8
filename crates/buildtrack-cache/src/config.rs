//! Configuration for the Redis connection and the cache store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Redis configuration for the distributed tier and the change channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (in-process tiers only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Additional server endpoints to enumerate during pattern deletes
    /// (replicas or shards that share the key space).
    #[serde(default)]
    pub extra_endpoints: Vec<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// When false, an unreachable backend at startup keeps the real pool so
    /// it recovers once Redis comes back. When true, the manager falls back
    /// to the unreachable placeholder endpoint.
    #[serde(default)]
    pub abort_on_connect_fail: bool,

    /// Pub/sub channel shared by every change-event kind
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

fn default_channel() -> String {
    "buildtrack:changes".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            extra_endpoints: Vec::new(),
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            abort_on_connect_fail: false,
            channel: default_channel(),
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.is_empty() {
            return Err("redis.url must not be empty when redis.enabled=true".into());
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err("redis timeouts must be > 0".into());
        }
        if self.channel.is_empty() {
            return Err("redis.channel must not be empty".into());
        }
        Ok(())
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Prefix applied to every key in the distributed tier
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL used when a caller does not pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Upper bound on fast-tier entries
    #[serde(default = "default_fast_tier_max_entries")]
    pub fast_tier_max_entries: usize,
}

fn default_key_prefix() -> String {
    "Sharing_".to_string()
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_fast_tier_max_entries() -> usize {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            fast_tier_max_entries: default_fast_tier_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.key_prefix.contains(['*', '?', '[']) {
            return Err("cache.key_prefix must not contain glob characters".into());
        }
        Ok(())
    }
}
