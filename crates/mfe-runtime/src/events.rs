//! Lifecycle events broadcast by the loader.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::record::ModuleHandle;

/// Default channel capacity for the lifecycle bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// An import/mount attempt started.
    LoadStarted {
        /// Load handle.
        handle: ModuleHandle,
        /// Module name.
        module: String,
        /// Surface id.
        surface: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// The module mounted.
    Mounted {
        /// Load handle.
        handle: ModuleHandle,
        /// Module name.
        module: String,
        /// Surface id.
        surface: String,
    },
    /// An attempt failed.
    LoadFailed {
        /// Load handle.
        handle: ModuleHandle,
        /// Module name.
        module: String,
        /// Error text.
        error: String,
        /// Whether another attempt follows.
        retrying: bool,
    },
    /// A superseded load was abandoned; a mount it completed was torn down.
    Discarded {
        /// Load handle.
        handle: ModuleHandle,
        /// Module name.
        module: String,
    },
    /// The module was unmounted and its surface reclaimed.
    Unmounted {
        /// Load handle.
        handle: ModuleHandle,
        /// Module name.
        module: String,
        /// Surface id.
        surface: String,
    },
}

impl LifecycleEvent {
    /// Short name of the event kind.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoadStarted { .. } => "load_started",
            Self::Mounted { .. } => "mounted",
            Self::LoadFailed { .. } => "load_failed",
            Self::Discarded { .. } => "discarded",
            Self::Unmounted { .. } => "unmounted",
        }
    }

    /// Handle the event concerns.
    #[must_use]
    pub fn handle(&self) -> ModuleHandle {
        match self {
            Self::LoadStarted { handle, .. }
            | Self::Mounted { handle, .. }
            | Self::LoadFailed { handle, .. }
            | Self::Discarded { handle, .. }
            | Self::Unmounted { handle, .. } => *handle,
        }
    }
}

/// Broadcast channel for [`LifecycleEvent`]s. Clones share the channel.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    sender: broadcast::Sender<Arc<LifecycleEvent>>,
}

impl LifecycleBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of receivers that got it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        trace!(event_type = event.event_type(), handle = %event.handle(), "Publishing lifecycle event");
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Subscribe to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> LifecycleReceiver {
        LifecycleReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a [`LifecycleBus`].
#[derive(Debug)]
pub struct LifecycleReceiver {
    receiver: broadcast::Receiver<Arc<LifecycleEvent>>,
}

impl LifecycleReceiver {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<LifecycleEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Lifecycle receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<LifecycleEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Lifecycle receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<Arc<LifecycleEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
