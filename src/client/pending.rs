//! Outstanding client requests awaiting replies.
//!
//! | Entry | Created by | Removed when |
//! |-------|------------|--------------|
//! | Future | `submit` | first reply, or timeout |
//! | Callback (one-shot) | `submit_async` | first reply |
//! | Callback (sticky) | `submit_async` with `Subscribe` | forced removal only |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::Frame;

use super::response::ClientResponse;

// ============================================================================
// Types
// ============================================================================

/// Reply callback: `(request_id, decoded reply)`.
pub type Callback = Arc<dyn Fn(&str, Result<ClientResponse>) + Send + Sync>;

/// One pending entry.
pub(crate) enum Pending {
    /// Single-use waiter for `submit`.
    Future(oneshot::Sender<Frame>),
    /// Callback for `submit_async`.
    Callback { callback: Callback, sticky: bool },
}

/// What to do with a reply that matched an entry.
pub(crate) enum Delivery {
    Future(oneshot::Sender<Frame>),
    Callback(Callback),
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Future(_) => f.write_str("Future"),
            Self::Callback { sticky, .. } => f.debug_struct("Callback").field("sticky", sticky).finish(),
        }
    }
}

// ============================================================================
// PendingTable
// ============================================================================

/// Pending entries keyed by request id.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: Mutex<FxHashMap<String, Pending>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: String, pending: Pending) {
        self.entries.lock().insert(id, pending);
    }

    /// Looks up the entry for a reply.
    ///
    /// Non-sticky entries are removed; sticky ones stay unless `force`.
    pub(crate) fn take(&self, id: &str, force: bool) -> Option<Delivery> {
        let mut entries = self.entries.lock();

        if !force
            && let Some(Pending::Callback {
                callback,
                sticky: true,
            }) = entries.get(id)
        {
            return Some(Delivery::Callback(Arc::clone(callback)));
        }

        match entries.remove(id)? {
            Pending::Future(tx) => Some(Delivery::Future(tx)),
            Pending::Callback { callback, .. } => Some(Delivery::Callback(callback)),
        }
    }

    /// Removes an entry regardless of stickiness.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(sticky: bool) -> Pending {
        Pending::Callback {
            callback: Arc::new(|_: &str, _: Result<ClientResponse>| {}),
            sticky,
        }
    }

    #[test]
    fn test_future_is_taken_once() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table.insert("1".into(), Pending::Future(tx));

        assert!(matches!(table.take("1", false), Some(Delivery::Future(_))));
        assert!(table.take("1", false).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_one_shot_callback_is_removed() {
        let table = PendingTable::new();
        table.insert("2".into(), callback(false));

        assert!(matches!(table.take("2", false), Some(Delivery::Callback(_))));
        assert!(table.take("2", false).is_none());
    }

    #[test]
    fn test_sticky_callback_survives_until_forced() {
        let table = PendingTable::new();
        table.insert("3".into(), callback(true));

        assert!(table.take("3", false).is_some());
        assert!(table.take("3", false).is_some());
        assert_eq!(table.len(), 1);

        assert!(table.take("3", true).is_some());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_unknown() {
        let table = PendingTable::new();
        assert!(!table.remove("404"));
    }
}
