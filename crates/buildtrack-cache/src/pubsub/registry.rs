//! Handler registry and dispatcher for change events.
//!
//! Each matching handler runs in its own task with a timeout and panic
//! recovery, so one misbehaving handler cannot stall or kill the others.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::{ChangeEvent, ChangeKind};

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Event kinds this handler wants.
    fn kinds(&self) -> &[ChangeKind];

    async fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError>;

    fn matches(&self, event: &ChangeEvent) -> bool {
        self.kinds().contains(&event.kind)
    }

    /// Called when the dispatcher fell behind and `missed` events were
    /// dropped before reaching any handler.
    async fn on_missed(&self, missed: u64) {
        let _ = missed;
    }
}

pub struct ChangeHandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn ChangeHandler>>>,
    timeout: Duration,
}

impl ChangeHandlerRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HANDLER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            timeout,
        }
    }

    pub async fn register(&self, handler: Arc<dyn ChangeHandler>) {
        let name = handler.name().to_string();
        self.handlers.write().await.push(handler);
        debug!(handler = %name, "Registered change handler");
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    async fn matching(&self, event: &ChangeEvent) -> Vec<Arc<dyn ChangeHandler>> {
        let handlers = self.handlers.read().await;
        handlers.iter().filter(|h| h.matches(event)).cloned().collect()
    }

    /// Run every matching handler and wait for all of them to finish.
    pub async fn dispatch(&self, event: &ChangeEvent) {
        let handlers = self.matching(event).await;
        if handlers.is_empty() {
            debug!(kind = ?event.kind, "No handlers matched change event");
            return;
        }

        let timeout = self.timeout;
        let tasks = handlers.into_iter().map(|handler| {
            let event = event.clone();
            tokio::spawn(async move {
                let name = handler.name().to_string();
                let result = tokio::time::timeout(timeout, async {
                    AssertUnwindSafe(handler.handle(&event)).catch_unwind().await
                })
                .await;

                match result {
                    Ok(Ok(Ok(()))) => {
                        debug!(handler = %name, kind = ?event.kind, "Change handler succeeded");
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(handler = %name, error = %e, "Change handler failed");
                    }
                    Ok(Err(panic)) => {
                        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        error!(handler = %name, panic = %panic_msg, "Change handler panicked");
                    }
                    Err(_) => {
                        error!(
                            handler = %name,
                            timeout_secs = timeout.as_secs(),
                            "Change handler timed out"
                        );
                    }
                }
            })
        });

        join_all(tasks).await;
    }

    /// Tell every handler, whatever its kinds, that events were lost.
    pub async fn notify_missed(&self, missed: u64) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            handler.on_missed(missed).await;
            debug!(handler = %handler.name(), missed, "Handler notified of missed events");
        }
    }
}

impl Default for ChangeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandlerRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Consumes the broadcaster and feeds the registry.
pub struct ChangeDispatcher {
    registry: Arc<ChangeHandlerRegistry>,
}

impl ChangeDispatcher {
    pub fn new(registry: Arc<ChangeHandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn the dispatch loop on `receiver`.
    pub fn start(self, receiver: broadcast::Receiver<ChangeEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Runs until the broadcaster is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<ChangeEvent>) {
        info!("Starting change dispatcher");

        loop {
            match receiver.recv().await {
                Ok(event) => self.registry.dispatch(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Change dispatcher lagged, missed events");
                    self.registry.notify_missed(n).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Change channel closed, stopping dispatcher");
                    break;
                }
            }
        }
    }

    pub fn registry(&self) -> &Arc<ChangeHandlerRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    struct CountingHandler {
        kinds: Vec<ChangeKind>,
        count: AtomicU32,
        missed: AtomicU64,
    }

    impl CountingHandler {
        fn new(kinds: Vec<ChangeKind>) -> Self {
            Self {
                kinds,
                count: AtomicU32::new(0),
                missed: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ChangeHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        fn kinds(&self) -> &[ChangeKind] {
            &self.kinds
        }

        async fn handle(&self, _event: &ChangeEvent) -> Result<(), HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_missed(&self, missed: u64) {
            self.missed.fetch_add(missed, Ordering::SeqCst);
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ChangeHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        fn kinds(&self) -> &[ChangeKind] {
            &[ChangeKind::UpdateUserSnapshot]
        }

        async fn handle(&self, _event: &ChangeEvent) -> Result<(), HandlerError> {
            panic!("boom");
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ChangeHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        fn kinds(&self) -> &[ChangeKind] {
            &[ChangeKind::UpdateUserSnapshot]
        }

        async fn handle(&self, _event: &ChangeEvent) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_kind() {
        let registry = ChangeHandlerRegistry::new();
        let user = Arc::new(CountingHandler::new(vec![ChangeKind::UpdateUserSnapshot]));
        let evict = Arc::new(CountingHandler::new(vec![ChangeKind::EvictFastTier]));
        registry.register(user.clone()).await;
        registry.register(evict.clone()).await;

        registry.dispatch(&ChangeEvent::update_user_snapshot(1)).await;

        assert_eq!(user.count.load(Ordering::SeqCst), 1);
        assert_eq!(evict.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panics_and_timeouts_are_isolated() {
        let registry = ChangeHandlerRegistry::with_timeout(Duration::from_millis(50));
        let counter = Arc::new(CountingHandler::new(vec![ChangeKind::UpdateUserSnapshot]));
        registry.register(Arc::new(PanickingHandler)).await;
        registry.register(Arc::new(SlowHandler)).await;
        registry.register(counter.clone()).await;

        registry.dispatch(&ChangeEvent::update_user_snapshot(1)).await;
        registry.dispatch(&ChangeEvent::update_user_snapshot(2)).await;

        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatcher_consumes_broadcaster() {
        use crate::pubsub::ChangeBroadcaster;

        let broadcaster = ChangeBroadcaster::new();
        let registry = Arc::new(ChangeHandlerRegistry::new());
        let counter = Arc::new(CountingHandler::new(vec![ChangeKind::EvictFastTierPattern]));
        registry.register(counter.clone()).await;

        let handle = ChangeDispatcher::new(registry).start(broadcaster.subscribe());
        broadcaster.send(ChangeEvent::evict_fast_tier_pattern("USER:*"));
        broadcaster.send(ChangeEvent::evict_fast_tier_pattern("PROJECT:*"));
        drop(broadcaster);
        handle.await.unwrap();

        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lagging_dispatcher_reports_missed_events() {
        use crate::pubsub::ChangeBroadcaster;

        let broadcaster = ChangeBroadcaster::with_capacity(2);
        let registry = Arc::new(ChangeHandlerRegistry::new());
        let user = Arc::new(CountingHandler::new(vec![ChangeKind::UpdateUserSnapshot]));
        let evict = Arc::new(CountingHandler::new(vec![ChangeKind::EvictFastTier]));
        registry.register(user.clone()).await;
        registry.register(evict.clone()).await;

        let receiver = broadcaster.subscribe();
        for id in 0..5 {
            broadcaster.send(ChangeEvent::update_user_snapshot(id));
        }
        drop(broadcaster);
        ChangeDispatcher::new(registry).run(receiver).await;

        assert_eq!(user.count.load(Ordering::SeqCst), 2);
        assert_eq!(user.missed.load(Ordering::SeqCst), 3);
        assert_eq!(evict.missed.load(Ordering::SeqCst), 3);
    }
}
