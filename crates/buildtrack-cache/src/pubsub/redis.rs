//! Redis pub/sub transport for change events.
//!
//! Pooled connections cannot SUBSCRIBE, so the listener opens its own client
//! and reconnects with exponential backoff when the stream drops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, redis::AsyncCommands};
use futures_util::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{ChangeBroadcaster, ChangeEvent, ChangePublisher};
use crate::error::EventError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Publishes change events on the shared Redis channel.
#[derive(Clone)]
pub struct RedisChangePublisher {
    pool: Pool,
    channel: String,
}

impl RedisChangePublisher {
    pub fn new(pool: Pool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ChangePublisher for RedisChangePublisher {
    async fn publish(&self, event: &ChangeEvent) -> Result<(), EventError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EventError::Pool(e.to_string()))?;

        let message = event.to_json()?;

        let _: () = conn
            .publish(&self.channel, &message)
            .await
            .map_err(|e| EventError::Publish(e.to_string()))?;

        debug!(
            channel = %self.channel,
            kind = ?event.kind,
            payload = %event.payload,
            "Published change event to Redis"
        );

        Ok(())
    }
}

/// Subscribes to the shared channel and forwards events to the local
/// broadcaster.
pub struct RedisChangeSync {
    redis_url: String,
    channel: String,
    broadcaster: ChangeBroadcaster,
}

impl RedisChangeSync {
    pub fn new(
        redis_url: impl Into<String>,
        channel: impl Into<String>,
        broadcaster: ChangeBroadcaster,
    ) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            broadcaster,
        }
    }

    /// Spawn the subscription loop.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::new(self).run())
    }

    /// Subscribe forever, reconnecting on failure.
    pub async fn run(self: Arc<Self>) {
        info!(channel = %self.channel, "Starting Redis change sync");

        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.subscribe_loop(&mut backoff).await {
                Ok(()) => {
                    info!("Redis change sync stopped gracefully");
                    break;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Redis change sync error, reconnecting"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn subscribe_loop(&self, backoff: &mut Duration) -> Result<(), EventError> {
        use deadpool_redis::redis::Client;

        let client = Client::open(self.redis_url.as_str())
            .map_err(|e| EventError::Connection(e.to_string()))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| EventError::Connection(e.to_string()))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| EventError::Subscribe(e.to_string()))?;

        info!(channel = %self.channel, "Subscribed to Redis change channel");
        *backoff = INITIAL_BACKOFF;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Unreadable Redis change message");
                    continue;
                }
            };

            match ChangeEvent::from_json(&payload) {
                Ok(event) => {
                    debug!(kind = ?event.kind, payload = %event.payload, "Received change event from Redis");
                    self.broadcaster.send(event);
                }
                Err(e) => {
                    warn!(error = %e, payload = %payload, "Failed to deserialize change event");
                }
            }
        }

        warn!("Redis pub/sub stream ended");
        Err(EventError::StreamEnded)
    }
}

impl std::fmt::Debug for RedisChangeSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChangeSync")
            .field("redis_url", &crate::connection::mask_url(&self.redis_url))
            .field("channel", &self.channel)
            .finish()
    }
}
