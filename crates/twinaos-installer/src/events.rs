//! Fan-out of installation events to observers.

use tokio::sync::broadcast;
use tracing::debug;
use twinaos_core::InstallEvent;

/// Receives every event a run publishes, in order.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: InstallEvent);
}

impl EventSink for broadcast::Sender<InstallEvent> {
    fn publish(&self, event: InstallEvent) {
        // No subscribers is normal before a client connects.
        if self.send(event).is_err() {
            debug!("install event dropped; no subscribers");
        }
    }
}
