//! Response mediator: subscriptions and server-pushed events.
//!
//! Tracks long-lived subscriptions so a later event can be pushed to every
//! still-open responder that asked for it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               ResponseMediator                  │
//! │  subscriptions: RequestKey → Subscription       │
//! │     "t1#4" → {name: "alice", Plain}             │
//! │     "t2#7" → {name: "bob",   Topic("general")}  │
//! │  topics: topic → {RequestKey}                   │
//! │     "general" → {"t2#7"}                        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Addressing
//!
//! | Operation | Targets |
//! |-----------|---------|
//! | `write(name)` | plain subscriptions named `name` |
//! | `write("*")` | all plain subscriptions |
//! | `write_topic(topic)` | subscriptions in `topic` |
//! | `write_topic("*")` | all topic subscriptions |
//!
//! # Failure Policy
//!
//! A failed delivery is logged and skipped. With pruning enabled (the
//! default), subscriptions whose connection has closed are removed after the
//! broadcast, without sending their `bye` payload.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestKey, TrackingId};

// ============================================================================
// Submodules
// ============================================================================

/// Responders and the reusable subscription responder.
pub mod responder;

pub use responder::{Reply, Responder, ReusableResponder, SubscriptionScope};

use responder::Subscription;

// ============================================================================
// Constants
// ============================================================================

/// Name or topic that addresses every subscriber in scope.
pub const BROADCAST: &str = "*";

// ============================================================================
// Tables
// ============================================================================

/// Subscription table plus topic index, guarded together.
#[derive(Debug, Default)]
struct Tables {
    subscriptions: FxHashMap<RequestKey, Arc<Subscription>>,
    topics: FxHashMap<String, FxHashSet<RequestKey>>,
}

impl Tables {
    fn insert(&mut self, subscription: Arc<Subscription>) {
        let key = subscription.key.clone();
        self.remove(&key);

        if let SubscriptionScope::Topic(topic) = &subscription.scope {
            self.topics
                .entry(topic.clone())
                .or_default()
                .insert(key.clone());
        }
        self.subscriptions.insert(key, subscription);
    }

    fn remove(&mut self, key: &RequestKey) -> Option<Arc<Subscription>> {
        let removed = self.subscriptions.remove(key)?;

        if let SubscriptionScope::Topic(topic) = &removed.scope
            && let Some(members) = self.topics.get_mut(topic)
        {
            members.remove(key);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }

        Some(removed)
    }

    fn plain_targets(&self, name: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .values()
            .filter(|s| s.scope == SubscriptionScope::Plain)
            .filter(|s| name == BROADCAST || s.name == name)
            .cloned()
            .collect()
    }

    fn topic_targets(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let keys: Vec<&RequestKey> = if topic == BROADCAST {
            self.topics.values().flatten().collect()
        } else {
            self.topics
                .get(topic)
                .map(|members| members.iter().collect())
                .unwrap_or_default()
        };

        keys.into_iter()
            .filter_map(|key| self.subscriptions.get(key))
            .cloned()
            .collect()
    }
}

// ============================================================================
// ResponseMediator
// ============================================================================

/// Registry of active subscriptions with fan-out writes.
///
/// Cheap to clone; clones share the same tables.
///
/// # Thread Safety
///
/// Mutations take the write lock. Broadcasts collect their targets under
/// the read lock and deliver after releasing it.
#[derive(Debug, Clone)]
pub struct ResponseMediator {
    inner: Arc<MediatorInner>,
}

#[derive(Debug)]
struct MediatorInner {
    tables: RwLock<Tables>,
    prune: bool,
}

// ============================================================================
// ResponseMediator - Constructor
// ============================================================================

impl ResponseMediator {
    /// Creates an empty mediator that prunes dead subscribers.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_pruning(true)
    }

    /// Creates an empty mediator with an explicit dead-subscriber policy.
    ///
    /// # Arguments
    ///
    /// * `prune` - Remove subscriptions whose connection has closed when a
    ///   write to them fails
    #[must_use]
    pub fn with_pruning(prune: bool) -> Self {
        Self {
            inner: Arc::new(MediatorInner {
                tables: RwLock::new(Tables::default()),
                prune,
            }),
        }
    }

    /// Returns `true` if dead subscribers are pruned on write failure.
    #[inline]
    #[must_use]
    pub fn prunes(&self) -> bool {
        self.inner.prune
    }
}

impl Default for ResponseMediator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ResponseMediator - Subscription Lifecycle
// ============================================================================

impl ResponseMediator {
    /// Registers a plain subscription at `key`.
    ///
    /// Returns a responder that, when it writes the initial reply, captures
    /// the writer for later pushes and broadcasts `hello` to all plain
    /// subscribers. A previous subscription at `key` is replaced.
    ///
    /// # Arguments
    ///
    /// * `key` - Request key of the subscribing request
    /// * `name` - Subscriber name used by [`write`](Self::write)
    /// * `responder` - Initial reply
    /// * `hello` - Broadcast once the initial reply is written
    /// * `bye` - Broadcast when the subscription is removed
    pub fn subscribe(
        &self,
        key: RequestKey,
        name: impl Into<String>,
        responder: impl Responder + 'static,
        hello: Option<Vec<u8>>,
        bye: Option<Vec<u8>>,
    ) -> ReusableResponder {
        self.register(key, name.into(), SubscriptionScope::Plain, responder, hello, bye)
    }

    /// Registers a subscription at `key` in `topic`.
    ///
    /// Like [`subscribe`](Self::subscribe), but `hello` goes to all topic
    /// subscribers and the subscription is addressed through
    /// [`write_topic`](Self::write_topic).
    pub fn subscribe_topic(
        &self,
        key: RequestKey,
        topic: impl Into<String>,
        name: impl Into<String>,
        responder: impl Responder + 'static,
        hello: Option<Vec<u8>>,
        bye: Option<Vec<u8>>,
    ) -> ReusableResponder {
        let scope = SubscriptionScope::Topic(topic.into());
        self.register(key, name.into(), scope, responder, hello, bye)
    }

    fn register(
        &self,
        key: RequestKey,
        name: String,
        scope: SubscriptionScope,
        responder: impl Responder + 'static,
        hello: Option<Vec<u8>>,
        bye: Option<Vec<u8>>,
    ) -> ReusableResponder {
        debug!(%key, %name, ?scope, "Subscribe");

        let subscription = Arc::new(Subscription::new(key, name, scope, hello, bye));
        self.inner.tables.write().insert(Arc::clone(&subscription));

        ReusableResponder::new(subscription, Box::new(responder), self.clone())
    }

    /// Cancels the subscription made by request `subid` on the connection
    /// that `key` belongs to.
    ///
    /// The removed subscription's `bye` payload, if any, is broadcast to its
    /// scope after removal.
    pub fn unsubscribe(&self, key: &RequestKey, subid: &str) {
        let target = key.derive(subid);
        let removed = self.inner.tables.write().remove(&target);

        match removed {
            Some(subscription) => {
                debug!(key = %target, name = %subscription.name, "Unsubscribe");
                self.say_goodbye(&[subscription]);
            }
            None => debug!(key = %target, "Unsubscribe for unknown subscription"),
        }
    }

    /// Cancels every subscription rooted at `tracking_id`.
    ///
    /// All removals happen under one write lock; `bye` payloads are
    /// broadcast afterwards, each exactly once.
    pub fn unsubscribe_all(&self, tracking_id: &TrackingId) {
        let removed: Vec<Arc<Subscription>> = {
            let mut tables = self.inner.tables.write();
            let keys: Vec<RequestKey> = tables
                .subscriptions
                .keys()
                .filter(|key| key.belongs_to(tracking_id))
                .cloned()
                .collect();

            keys.iter().filter_map(|key| tables.remove(key)).collect()
        };

        if !removed.is_empty() {
            debug!(%tracking_id, count = removed.len(), "Unsubscribed all");
        }
        self.say_goodbye(&removed);
    }

    fn say_goodbye(&self, removed: &[Arc<Subscription>]) {
        for subscription in removed {
            let Some(bye) = &subscription.bye else {
                continue;
            };
            let result = match &subscription.scope {
                SubscriptionScope::Plain => self.write(BROADCAST, bye),
                SubscriptionScope::Topic(_) => self.write_topic(BROADCAST, bye),
            };
            if let Err(e) = result {
                warn!(key = %subscription.key, error = %e, "Failed to broadcast bye");
            }
        }
    }
}

// ============================================================================
// ResponseMediator - Queries
// ============================================================================

impl ResponseMediator {
    /// Returns the distinct names of plain subscribers.
    #[must_use]
    pub fn subscribed(&self) -> BTreeSet<String> {
        self.inner
            .tables
            .read()
            .subscriptions
            .values()
            .filter(|s| s.scope == SubscriptionScope::Plain)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Returns the topics that currently have subscribers.
    #[must_use]
    pub fn subscribed_topics(&self) -> BTreeSet<String> {
        self.inner.tables.read().topics.keys().cloned().collect()
    }

    /// Returns the distinct names subscribed to `topic`.
    #[must_use]
    pub fn subscribed_topic(&self, topic: &str) -> BTreeSet<String> {
        let tables = self.inner.tables.read();
        tables
            .topics
            .get(topic)
            .into_iter()
            .flatten()
            .filter_map(|key| tables.subscriptions.get(key))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Returns the number of active subscriptions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tables.read().subscriptions.len()
    }

    /// Returns `true` if there are no active subscriptions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// ResponseMediator - Delivery
// ============================================================================

impl ResponseMediator {
    /// Pushes `data` to plain subscribers named `name`, or to all of them
    /// when `name` is `"*"`.
    ///
    /// Returns the number of successful deliveries.
    ///
    /// # Errors
    ///
    /// Individual delivery failures are logged, not returned.
    pub fn write(&self, name: &str, data: &[u8]) -> Result<usize> {
        let targets = self.inner.tables.read().plain_targets(name);
        trace!(name, targets = targets.len(), "Write");
        Ok(self.deliver(&targets, data))
    }

    /// Pushes `data` to subscribers of `topic`, or to every topic subscriber
    /// when `topic` is `"*"`.
    ///
    /// Returns the number of successful deliveries.
    ///
    /// # Errors
    ///
    /// Individual delivery failures are logged, not returned.
    pub fn write_topic(&self, topic: &str, data: &[u8]) -> Result<usize> {
        let targets = self.inner.tables.read().topic_targets(topic);
        trace!(topic, targets = targets.len(), "Write topic");
        Ok(self.deliver(&targets, data))
    }

    fn deliver(&self, targets: &[Arc<Subscription>], data: &[u8]) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for subscription in targets {
            match subscription.push(data) {
                Some(Ok(_)) => delivered += 1,
                Some(Err(e)) => {
                    warn!(key = %subscription.key, error = %e, "Failed to write to subscriber");
                    if matches!(e, Error::ConnectionClosed) {
                        dead.push(Arc::clone(subscription));
                    }
                }
                None => trace!(key = %subscription.key, "Subscriber has no writer yet"),
            }
        }

        if self.inner.prune && !dead.is_empty() {
            self.prune(&dead);
        }

        delivered
    }

    /// Removes dead subscriptions unless they were replaced meanwhile.
    fn prune(&self, dead: &[Arc<Subscription>]) {
        let mut tables = self.inner.tables.write();
        for subscription in dead {
            let current = tables.subscriptions.get(&subscription.key);
            if current.is_some_and(|c| Arc::ptr_eq(c, subscription)) {
                tables.remove(&subscription.key);
                debug!(key = %subscription.key, "Pruned dead subscriber");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
