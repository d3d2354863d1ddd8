//! Error types for the cache and pub/sub layers.
//!
//! None of these escape [`CacheStore`](crate::CacheStore); they exist so the
//! tiers can report what went wrong before the store logs and swallows it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No distributed tier is configured or reachable.
    #[error("Distributed cache unavailable")]
    Unavailable,

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur while publishing or receiving change events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis publish error: {0}")]
    Publish(String),

    #[error("Redis message error: {0}")]
    Message(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis pub/sub stream ended")]
    StreamEnded,
}
