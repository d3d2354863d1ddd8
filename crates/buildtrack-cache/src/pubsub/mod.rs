//! Cross-instance change propagation.
//!
//! Every change event travels on one shared channel as JSON:
//!
//! ```text
//! {"kind":"UpdateUserSnapshot","payload":"42"}
//! ```
//!
//! Locally, events flow through a [`ChangeBroadcaster`]. With Redis enabled,
//! [`RedisChangePublisher`] publishes to the channel and [`RedisChangeSync`]
//! feeds every received message (including our own) back into the local
//! broadcaster. Without Redis, [`LocalChangePublisher`] sends straight to the
//! broadcaster. A [`ChangeDispatcher`] routes broadcast events to the
//! registered [`ChangeHandler`]s.

mod broadcaster;
mod eviction;
mod redis;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EventError;

pub use broadcaster::ChangeBroadcaster;
pub use eviction::FastTierEvictionHandler;
pub use self::redis::{RedisChangePublisher, RedisChangeSync};
pub use registry::{ChangeDispatcher, ChangeHandler, ChangeHandlerRegistry, HandlerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Payload: id of the user row to re-read into the snapshot.
    UpdateUserSnapshot,
    /// Payload: logical key to drop from the fast tier.
    EvictFastTier,
    /// Payload: logical glob pattern to sweep from the fast tier.
    EvictFastTierPattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub payload: String,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn update_user_snapshot(user_id: i64) -> Self {
        Self::new(ChangeKind::UpdateUserSnapshot, user_id.to_string())
    }

    pub fn evict_fast_tier(key: &str) -> Self {
        Self::new(ChangeKind::EvictFastTier, key)
    }

    pub fn evict_fast_tier_pattern(pattern: &str) -> Self {
        Self::new(ChangeKind::EvictFastTierPattern, pattern)
    }

    /// Payload parsed as an entity id.
    pub fn payload_id(&self) -> Option<i64> {
        self.payload.trim().parse().ok()
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        serde_json::from_str(raw).map_err(|e| EventError::Serialization(e.to_string()))
    }
}

/// Sends change events to every instance, this one included.
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, event: &ChangeEvent) -> Result<(), EventError>;
}

/// Single-instance publisher: events go straight to the local broadcaster.
#[derive(Clone, Debug)]
pub struct LocalChangePublisher {
    broadcaster: ChangeBroadcaster,
}

impl LocalChangePublisher {
    pub fn new(broadcaster: ChangeBroadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl ChangePublisher for LocalChangePublisher {
    async fn publish(&self, event: &ChangeEvent) -> Result<(), EventError> {
        let receivers = self.broadcaster.send(event.clone());
        tracing::debug!(kind = ?event.kind, payload = %event.payload, receivers, "published change event locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let event = ChangeEvent::update_user_snapshot(42);
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"kind":"UpdateUserSnapshot","payload":"42"}"#
        );
        assert_eq!(ChangeEvent::from_json(&event.to_json().unwrap()).unwrap(), event);
        assert_eq!(event.payload_id(), Some(42));
    }

    #[test]
    fn malformed_payloads() {
        assert!(ChangeEvent::from_json(r#"{"kind":"Nope","payload":""}"#).is_err());
        assert_eq!(ChangeEvent::evict_fast_tier("USER:LIST").payload_id(), None);
    }

    #[tokio::test]
    async fn local_publisher_reaches_subscribers() {
        let broadcaster = ChangeBroadcaster::new();
        let mut receiver = broadcaster.subscribe();
        let publisher = LocalChangePublisher::new(broadcaster);

        publisher
            .publish(&ChangeEvent::evict_fast_tier("PROJECT:ID:1"))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::EvictFastTier);
        assert_eq!(event.payload, "PROJECT:ID:1");
    }
}
