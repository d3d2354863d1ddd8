//! Background execution of invalidation plans.
//!
//! Writers hand plans to [`InvalidationQueue::submit`] and return at once; a
//! single worker task runs them against the store in submission order.
//! Failures stay inside the store's logging, so a write never waits on or
//! fails because of cache cleanup.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::invalidation::InvalidationPlan;
use crate::store::CacheStore;

#[derive(Default)]
struct QueueState {
    pending: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    idle: Notify,
}

impl QueueState {
    fn finish_one(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Counters exposed for health reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub pending: usize,
}

pub struct InvalidationQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<InvalidationPlan>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<QueueState>,
}

impl InvalidationQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(store: Arc<CacheStore>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<InvalidationPlan>();
        let state = Arc::new(QueueState::default());

        let worker_state = state.clone();
        let worker = tokio::spawn(async move {
            tracing::debug!("invalidation worker started");
            while let Some(plan) = receiver.recv().await {
                plan.execute(&store).await;
                worker_state.finish_one();
            }
            tracing::debug!("invalidation worker stopped");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        }
    }

    /// Queue `plan` for execution. Never blocks.
    pub fn submit(&self, plan: InvalidationPlan) {
        if plan.is_empty() {
            return;
        }

        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = guard.as_ref() else {
            tracing::warn!("invalidation queue is shut down, dropping plan");
            return;
        };

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        self.state.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(plan).is_err() {
            tracing::warn!("invalidation worker is gone, dropping plan");
            self.state.submitted.fetch_sub(1, Ordering::SeqCst);
            if self.state.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.state.idle.notify_waiters();
            }
        }
    }

    /// Wait until every plan submitted so far has been attempted.
    pub async fn flush(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting plans, run the ones already queued, and stop the worker.
    pub async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "invalidation worker panicked");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.state.submitted.load(Ordering::SeqCst),
            completed: self.state.completed.load(Ordering::SeqCst),
            pending: self.state.pending.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for InvalidationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationQueue")
            .field("stats", &self.stats())
            .finish()
    }
}
