//! Connection registry.
//!
//! Maps each live connection to its tracking id, writer and cancel signal
//! so the close path can find the tracking id to clean up, and shutdown can
//! reach every socket even when its peer has stopped reading.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tracing::debug;

use crate::identifiers::{ConnectionId, TrackingId};

use super::sink::FrameSink;

// ============================================================================
// Types
// ============================================================================

/// Registry entry for one live connection.
#[derive(Debug, Clone)]
struct Entry {
    tracking_id: TrackingId,
    sink: FrameSink,
    cancel: Arc<Notify>,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Live connections keyed by [`ConnectionId`].
///
/// # Thread Safety
///
/// Guarded by its own `RwLock`; no other lock is ever taken while it is held.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<FxHashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection.
    ///
    /// Returns the signal the connection's read loop waits on; it fires
    /// when [`close_all`](Self::close_all) asks the connection to stop.
    pub fn add(&self, id: ConnectionId, tracking_id: TrackingId, sink: FrameSink) -> Arc<Notify> {
        debug!(connection = %id, %tracking_id, "Connection registered");
        let cancel = Arc::new(Notify::new());
        self.connections.write().insert(
            id,
            Entry {
                tracking_id,
                sink,
                cancel: Arc::clone(&cancel),
            },
        );
        cancel
    }

    /// Deregisters a connection and returns its tracking id.
    pub fn remove(&self, id: ConnectionId) -> Option<TrackingId> {
        let removed = self.connections.write().remove(&id)?;
        debug!(connection = %id, tracking_id = %removed.tracking_id, "Connection deregistered");
        Some(removed.tracking_id)
    }

    /// Returns the tracking id of a registered connection.
    #[must_use]
    pub fn tracking_id(&self, id: ConnectionId) -> Option<TrackingId> {
        self.connections
            .read()
            .get(&id)
            .map(|entry| entry.tracking_id.clone())
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connection is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends a close frame on every registered connection and signals its
    /// read loop to stop.
    ///
    /// Entries stay registered; each connection deregisters itself once its
    /// read loop ends, at the latest after a short grace period.
    pub fn close_all(&self) {
        let entries: Vec<Entry> = self.connections.read().values().cloned().collect();

        debug!(count = entries.len(), "Closing all connections");
        for entry in entries {
            entry.sink.close();
            entry.cancel.notify_one();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_add_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ConnectionId::next();

        let _cancel = registry.add(id, TrackingId::new("abc"), FrameSink::from_sender(tx));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tracking_id(id), Some(TrackingId::new("abc")));

        assert_eq!(registry.remove(id), Some(TrackingId::new("abc")));
        assert!(registry.is_empty());
        assert_eq!(registry.remove(id), None);
        assert_eq!(registry.tracking_id(id), None);
    }

    #[tokio::test]
    async fn test_close_all_sends_close_frames_and_cancels() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let cancel1 = registry.add(ConnectionId::next(), TrackingId::new("a"), FrameSink::from_sender(tx1));
        let cancel2 = registry.add(ConnectionId::next(), TrackingId::new("b"), FrameSink::from_sender(tx2));

        registry.close_all();

        assert!(matches!(rx1.try_recv(), Ok(Message::Close(None))));
        assert!(matches!(rx2.try_recv(), Ok(Message::Close(None))));
        assert_eq!(registry.len(), 2);

        // the signal is stored, so a read loop that was not yet waiting sees it
        let signalled = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            cancel1.notified().await;
            cancel2.notified().await;
        })
        .await;
        assert!(signalled.is_ok());
    }
}
