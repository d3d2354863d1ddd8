//! Applies peer fast-tier evictions to this instance's fast tier.

use async_trait::async_trait;

use super::{ChangeEvent, ChangeHandler, ChangeKind, HandlerError};
use crate::fast::FastTier;

pub struct FastTierEvictionHandler {
    fast: FastTier,
}

impl FastTierEvictionHandler {
    pub fn new(fast: FastTier) -> Self {
        Self { fast }
    }
}

#[async_trait]
impl ChangeHandler for FastTierEvictionHandler {
    fn name(&self) -> &str {
        "fast_tier_eviction"
    }

    fn kinds(&self) -> &[ChangeKind] {
        &[ChangeKind::EvictFastTier, ChangeKind::EvictFastTierPattern]
    }

    async fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        match event.kind {
            ChangeKind::EvictFastTier => {
                self.fast.remove(&event.payload);
            }
            ChangeKind::EvictFastTierPattern => {
                let removed = self.fast.remove_matching(&event.payload);
                tracing::debug!(pattern = %event.payload, removed, "applied peer fast-tier sweep");
            }
            ChangeKind::UpdateUserSnapshot => {}
        }
        Ok(())
    }

    /// Any of the lost events may have been an eviction.
    async fn on_missed(&self, missed: u64) {
        let dropped = self.fast.len();
        self.fast.clear();
        tracing::warn!(missed, dropped, "fast tier cleared after missed change events");
    }
}
