use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::core::storage::SourceId;

/// Default number of events buffered per subscriber.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The set of registered sources changed and observers should resync.
    SourcesChanged,
    /// A refresh cycle made a new aggregate visible.
    Published {
        cycle: u64,
        succeeded: usize,
        failed: usize,
    },
    SourceFailed { source_id: SourceId, reason: String },
}

/// Explicit replacement for a process-wide "sources changed" notification.
///
/// Diagnostic events go out on a bounded broadcast channel. `SourcesChanged`
/// additionally bumps a generation counter on a separate `watch` channel, which
/// is what orchestrators listen to: it never lags behind the diagnostics and
/// coalesces bursts of changes into one pending signal.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    generation: Arc<watch::Sender<u64>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (generation, _) = watch::channel(0);
        Self {
            tx,
            generation: Arc::new(generation),
        }
    }

    /// Sends to every current subscriber; having none is not an error.
    pub fn emit(&self, event: SyncEvent) {
        if event == SyncEvent::SourcesChanged {
            self.generation.send_modify(|generation| *generation += 1);
        }
        let delivered = self.tx.send(event).unwrap_or(0);
        tracing::trace!(delivered, "sync event emitted");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Receiver for the sources-changed generation. Only changes made after
    /// this call are reported.
    pub fn watch_sources(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
