//! # buildtrack-cache
//!
//! Caching layer for BuildTrack.
//!
//! ## Architecture
//!
//! - **Fast tier (L1)**: per-instance DashMap, opt-in per call
//! - **Distributed tier (L2)**: Redis shared by all instances
//! - **Invalidation**: per-entity key spaces plus a static fan-out table,
//!   executed off the request path by [`InvalidationQueue`]
//! - **Pub/sub**: change events keep peer fast tiers and reference
//!   snapshots in step
//!
//! ```text
//! get → L1 → L2 → repository
//! write → repository → InvalidationPlan → InvalidationQueue → L1 + L2
//! ```
//!
//! If Redis is disabled or unreachable every operation degrades to the fast
//! tier; no cache failure reaches the caller.

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod fast;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod pubsub;
pub mod store;
pub mod tier;

pub use config::{CacheSettings, RedisConfig};
pub use connection::{ConnectionManager, RedisConnection};
pub use dispatch::{InvalidationQueue, QueueStats};
pub use error::{CacheError, EventError};
pub use fast::FastTier;
pub use invalidation::{EntityChange, InvalidationPlan, dependents, derived_patterns};
pub use keys::{KeySpace, SearchKey};
pub use pubsub::{
    ChangeBroadcaster, ChangeDispatcher, ChangeEvent, ChangeHandler, ChangeHandlerRegistry,
    ChangeKind, ChangePublisher, FastTierEvictionHandler, HandlerError, LocalChangePublisher,
    RedisChangePublisher, RedisChangeSync,
};
pub use store::{CacheStats, CacheStore};
pub use tier::{DistributedTier, MemoryTier, RedisTier};
