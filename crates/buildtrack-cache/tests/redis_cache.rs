//! Integration tests for the two-tier cache against a real Redis.
//!
//! Tests use testcontainers to spin up Redis and are ignored unless Docker is
//! available. The degradation tests at the bottom run everywhere.

use std::sync::Arc;
use std::time::Duration;

use buildtrack_cache::{
    CacheSettings, CacheStore, ChangeBroadcaster, ChangeEvent, ChangeKind, ChangePublisher,
    ConnectionManager, RedisChangePublisher, RedisChangeSync, RedisConfig,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn redis_config(url: String) -> RedisConfig {
    RedisConfig {
        enabled: true,
        url,
        pool_size: 4,
        connect_timeout_ms: 2000,
        operation_timeout_ms: 2000,
        ..Default::default()
    }
}

/// Store with a unique prefix so tests sharing the container stay apart.
async fn redis_store(prefix: &str) -> CacheStore {
    let manager = ConnectionManager::new(redis_config(get_redis_url().await));
    let conn = manager.connection().await;
    assert!(conn.as_ref().is_some_and(|c| !c.is_placeholder()));
    CacheStore::from_connection(
        CacheSettings {
            key_prefix: prefix.to_string(),
            ..Default::default()
        },
        conn,
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_set_get_delete() {
    let store = redis_store("it_basic_").await;
    assert!(store.is_distributed_available().await);
    assert_eq!(store.stats().mode, "redis");

    store.set("PROJECT:ID:1", &vec![1, 2, 3], None, false).await;
    assert_eq!(
        store.get::<Vec<i32>>("PROJECT:ID:1", false).await,
        Some(vec![1, 2, 3])
    );

    store.delete("PROJECT:ID:1").await;
    assert_eq!(store.get::<Vec<i32>>("PROJECT:ID:1", false).await, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_pattern_delete_is_selective() {
    let store = redis_store("it_pattern_").await;
    for id in 0..600 {
        store
            .set(&format!("CONSTRUCTION_LOG:ID:{id}"), &id, None, false)
            .await;
    }
    store.set("CONTRACT:ID:1", &1, None, false).await;

    store.delete_by_pattern("CONSTRUCTION_LOG:").await;

    assert_eq!(store.get::<i32>("CONSTRUCTION_LOG:ID:0", false).await, None);
    assert_eq!(store.get::<i32>("CONSTRUCTION_LOG:ID:599", false).await, None);
    assert_eq!(store.get::<i32>("CONTRACT:ID:1", false).await, Some(1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_promotion_keeps_writer_ttl() {
    let writer = redis_store("it_promote_").await;
    let reader = redis_store("it_promote_").await;

    writer
        .set("VEHICLE:ID:1", &1, Some(Duration::from_secs(1)), false)
        .await;
    assert_eq!(reader.get::<i32>("VEHICLE:ID:1", true).await, Some(1));
    assert!(reader.fast_tier().contains("VEHICLE:ID:1"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!reader.fast_tier().contains("VEHICLE:ID:1"));
    assert_eq!(reader.get::<i32>("VEHICLE:ID:1", true).await, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_ttl_expiry() {
    let store = redis_store("it_ttl_").await;
    store
        .set("VEHICLE:ID:1", &1, Some(Duration::from_secs(1)), false)
        .await;
    assert_eq!(store.get::<i32>("VEHICLE:ID:1", false).await, Some(1));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(store.get::<i32>("VEHICLE:ID:1", false).await, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_pubsub_roundtrip() {
    let url = get_redis_url().await;
    let channel = "it:changes";

    let broadcaster = ChangeBroadcaster::new();
    let mut receiver = broadcaster.subscribe();
    let sync = RedisChangeSync::new(url.clone(), channel, broadcaster).start();

    let manager = ConnectionManager::new(redis_config(url));
    let conn = manager.connection().await.expect("connection");
    let publisher = RedisChangePublisher::new(conn.pool().clone(), channel);

    // The subscription is established asynchronously; publish until it lands.
    let received = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            publisher
                .publish(&ChangeEvent::update_user_snapshot(7))
                .await
                .expect("publish");
            if let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_millis(200), receiver.recv()).await
            {
                return event;
            }
        }
    })
    .await
    .expect("event received");

    assert_eq!(received.kind, ChangeKind::UpdateUserSnapshot);
    assert_eq!(received.payload_id(), Some(7));
    sync.abort();
}

#[tokio::test]
async fn test_unreachable_backend_degrades_to_fast_tier() {
    let manager = ConnectionManager::new(RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".into(),
        connect_timeout_ms: 200,
        operation_timeout_ms: 200,
        ..Default::default()
    });
    let store = Arc::new(CacheStore::from_connection(
        CacheSettings::default(),
        manager.connection().await,
    ));
    assert!(!store.is_distributed_available().await);

    // Distributed reads miss, writes are swallowed.
    store.set("USER:ID:1", &"alice", None, false).await;
    assert_eq!(store.get::<String>("USER:ID:1", false).await, None);
    assert_eq!(store.get_string("USER:ID:1", false).await, "");

    // The fast tier keeps serving.
    store.set("USER:ID:2", &"bob", None, true).await;
    assert_eq!(store.get::<String>("USER:ID:2", true).await.as_deref(), Some("bob"));

    // Pattern delete sweeps the fast tier only and does not fail.
    store.delete_by_pattern("USER:").await;
    assert_eq!(store.get::<String>("USER:ID:2", true).await, None);
    store.delete("USER:ID:2").await;
}

#[tokio::test]
async fn test_placeholder_connection_after_bad_url() {
    let manager = ConnectionManager::new(RedisConfig {
        enabled: true,
        url: "::not-a-redis-url::".into(),
        connect_timeout_ms: 200,
        operation_timeout_ms: 200,
        ..Default::default()
    });
    let conn = manager.connection().await;
    assert!(conn.as_ref().is_some_and(|c| c.is_placeholder()));

    let store = CacheStore::from_connection(CacheSettings::default(), conn);
    store.set("PROJECT:LIST", &vec![1], None, false).await;
    assert_eq!(store.get::<Vec<i32>>("PROJECT:LIST", false).await, None);
}
