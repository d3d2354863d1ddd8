//! Cross-instance sync of the user snapshot.
//!
//! The instance that changes a user upserts its own snapshot first, then
//! publishes `UpdateUserSnapshot`. Every instance, the publisher included,
//! re-runs the upsert when the event arrives; the upsert is idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use buildtrack_cache::{ChangeEvent, ChangeHandler, ChangeKind, ChangePublisher, HandlerError};
use buildtrack_core::StorageError;
use tracing::{debug, warn};

use crate::snapshot::UserSnapshot;

pub struct SnapshotSync {
    snapshot: Arc<UserSnapshot>,
    publisher: Arc<dyn ChangePublisher>,
}

impl SnapshotSync {
    pub fn new(snapshot: Arc<UserSnapshot>, publisher: Arc<dyn ChangePublisher>) -> Self {
        Self {
            snapshot,
            publisher,
        }
    }

    pub fn snapshot(&self) -> &Arc<UserSnapshot> {
        &self.snapshot
    }

    /// Refresh `user_id` locally, then tell the other instances.
    ///
    /// A publish failure is logged; peers catch up on their next full reload.
    pub async fn trigger_update(&self, user_id: i64) -> Result<(), StorageError> {
        self.snapshot.upsert(user_id).await?;
        if let Err(e) = self
            .publisher
            .publish(&ChangeEvent::update_user_snapshot(user_id))
            .await
        {
            warn!(user_id, error = %e, "failed to publish user snapshot update");
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for SnapshotSync {
    fn name(&self) -> &str {
        "user_snapshot_sync"
    }

    fn kinds(&self) -> &[ChangeKind] {
        &[ChangeKind::UpdateUserSnapshot]
    }

    async fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        let user_id = event
            .payload_id()
            .ok_or_else(|| HandlerError::new(format!("invalid user id: {:?}", event.payload)))?;
        self.snapshot
            .upsert(user_id)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        debug!(user_id, "applied user snapshot update");
        Ok(())
    }

    /// Dropped updates cannot be replayed, so reload the whole snapshot.
    async fn on_missed(&self, missed: u64) {
        warn!(missed, "user snapshot updates missed, reloading");
        if let Err(e) = self.snapshot.reload().await {
            warn!(error = %e, "user snapshot reload after missed updates failed");
        }
    }
}
