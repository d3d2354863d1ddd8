pub mod config;
pub mod observability;
pub mod refresh;
pub mod server;
pub mod services;
pub mod snapshot;
pub mod sync;

pub use config::{AppConfig, LoggingConfig, ScheduleConfig, StorageBackend, StorageConfig};
pub use observability::init_tracing;
pub use refresh::{DailyRefreshJob, Refreshable, day_stamp};
pub use server::{Application, ApplicationBuilder, Repositories, Services};
pub use services::{ServiceCache, ServiceError, ServiceResult};
pub use snapshot::{
    ReferenceSnapshot, RepositorySource, SnapshotRecord, SnapshotSource, SnapshotState,
    UserSnapshot,
};
pub use sync::SnapshotSync;

use std::sync::Arc;

use buildtrack_cache::{
    CacheSettings, CacheStore, ChangeBroadcaster, ChangePublisher, ConnectionManager,
    LocalChangePublisher, RedisChangePublisher, RedisChangeSync, RedisConfig,
};
use tokio::task::JoinHandle;

/// Cache store plus the publisher its evictions and snapshot updates go
/// through.
pub struct CacheWiring {
    pub store: Arc<CacheStore>,
    pub publisher: Arc<dyn ChangePublisher>,
    /// Redis subscriber feeding `broadcaster`, when Redis is in use.
    pub subscriber: Option<JoinHandle<()>>,
}

/// Create the cache store based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: fast tier only, change events stay in-process
/// - **Redis enabled**: both tiers, change events go through the Redis channel
///   and come back to every instance through `broadcaster`
///
/// ## Graceful Degradation
///
/// A Redis URL that cannot be parsed leaves the store on a placeholder
/// connection whose calls fail fast; events then stay in-process. An
/// unreachable server keeps the real pool and recovers when it comes back.
pub async fn create_cache_store(
    redis: &RedisConfig,
    settings: &CacheSettings,
    broadcaster: &ChangeBroadcaster,
) -> CacheWiring {
    let manager = ConnectionManager::new(redis.clone());
    let conn = manager.connection().await;

    let (publisher, subscriber): (Arc<dyn ChangePublisher>, Option<JoinHandle<()>>) = match &conn {
        Some(conn) if !conn.is_placeholder() => {
            let publisher = RedisChangePublisher::new(conn.pool().clone(), redis.channel.clone());
            let subscriber =
                RedisChangeSync::new(redis.url.clone(), redis.channel.clone(), broadcaster.clone())
                    .start();
            tracing::info!(channel = %redis.channel, "change events use Redis pub/sub");
            (Arc::new(publisher) as Arc<dyn ChangePublisher>, Some(subscriber))
        }
        _ => {
            tracing::info!("change events stay in-process");
            (
                Arc::new(LocalChangePublisher::new(broadcaster.clone())) as Arc<dyn ChangePublisher>,
                None,
            )
        }
    };

    let store = CacheStore::from_connection(settings.clone(), conn).with_publisher(publisher.clone());
    tracing::info!(mode = %store.stats().mode, "cache store ready");

    CacheWiring {
        store: Arc::new(store),
        publisher,
        subscriber,
    }
}
