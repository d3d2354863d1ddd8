//! Daily reload of reference data.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use buildtrack_core::StorageError;
use chrono::{DateTime, Datelike, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ScheduleConfig;
use crate::snapshot::{ReferenceSnapshot, SnapshotRecord};

/// Something the refresh job can force-reload.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    async fn refresh(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: SnapshotRecord> Refreshable for ReferenceSnapshot<T> {
    fn name(&self) -> &str {
        ReferenceSnapshot::name(self)
    }

    async fn refresh(&self) -> Result<(), StorageError> {
        self.reload().await
    }
}

/// `yyyymmdd` of the UTC date.
pub fn day_stamp(now: DateTime<Utc>) -> i32 {
    now.year() * 10_000 + now.month() as i32 * 100 + now.day() as i32
}

/// Reloads every registered target once per UTC day.
pub struct DailyRefreshJob {
    targets: Vec<Arc<dyn Refreshable>>,
    interval: Duration,
    enabled: bool,
    /// Day of the last successful refresh, 0 before the first one.
    last_stamp: AtomicI32,
}

impl DailyRefreshJob {
    pub fn new(schedule: &ScheduleConfig) -> Self {
        Self {
            targets: Vec::new(),
            interval: schedule.interval(),
            enabled: schedule.enabled,
            last_stamp: AtomicI32::new(0),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Arc<dyn Refreshable>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn last_stamp(&self) -> i32 {
        self.last_stamp.load(Ordering::SeqCst)
    }

    /// Record that the targets were loaded at `now` outside the job, so the
    /// first tick of that day does not load them again.
    pub fn mark_refreshed(&self, now: DateTime<Utc>) {
        self.last_stamp.fetch_max(day_stamp(now), Ordering::SeqCst);
    }

    /// One tick. Returns whether the targets were reloaded.
    ///
    /// The stamp only advances when every target reloaded, so a failed day is
    /// retried on the next tick.
    pub async fn run_once(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let today = day_stamp(now);
        if today <= self.last_stamp() {
            debug!(today, "reference data already refreshed today");
            return false;
        }

        let mut failed = false;
        for target in &self.targets {
            if let Err(e) = target.refresh().await {
                error!(target = target.name(), error = %e, "daily refresh failed");
                failed = true;
            }
        }
        if failed {
            return false;
        }

        self.last_stamp.store(today, Ordering::SeqCst);
        info!(today, targets = self.targets.len(), "reference data refreshed");
        true
    }

    /// Spawn the loop. Returns `None` when scheduling is disabled.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.enabled {
            info!("daily refresh disabled");
            return None;
        }
        Some(tokio::spawn(self.run(cancel)))
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("daily refresh stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_once(Utc::now()).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for DailyRefreshJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyRefreshJob")
            .field("targets", &self.targets.len())
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("last_stamp", &self.last_stamp())
            .finish()
    }
}
