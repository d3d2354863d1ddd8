//! In-process fan-out of change events.

use tokio::sync::broadcast;

use super::ChangeEvent;

/// Events beyond this limit are dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Cloneable handle to the local change-event bus.
#[derive(Clone)]
pub struct ChangeBroadcaster {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers. Returns how many received it.
    pub fn send(&self, event: ChangeEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Events sent before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
