//! Type-safe identifiers for connections and exchanges.
//!
//! Newtype wrappers keep tracking ids, request keys and connection ids
//! from being mixed up with arbitrary strings.
//!
//! | Type | Shape | Scope |
//! |------|-------|-------|
//! | [`TrackingId`] | client-supplied or UUIDv4 | one connection lifetime |
//! | [`RequestKey`] | `trackingID#requestID` | one exchange |
//! | [`ConnectionId`] | process-local counter | registry bookkeeping |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Separator between the tracking id and the request id in a [`RequestKey`].
pub const KEY_SEPARATOR: char = '#';

/// Global counter for connection ids.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// TrackingId
// ============================================================================

/// Identifies one WebSocket connection for its whole lifetime.
///
/// Prefixes every [`RequestKey`] created on that connection so all of its
/// subscriptions can be cancelled together on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    /// Wraps an existing tracking id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random tracking id (UUIDv4).
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the key for request `request_id` on this connection.
    #[inline]
    #[must_use]
    pub fn request_key(&self, request_id: &str) -> RequestKey {
        RequestKey::new(self, request_id)
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackingId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// RequestKey
// ============================================================================

/// Uniquely identifies one exchange on one connection.
///
/// Rendered as `trackingID#requestID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Builds a key from a tracking id and a request id.
    #[must_use]
    pub fn new(tracking_id: &TrackingId, request_id: &str) -> Self {
        Self(format!("{tracking_id}{KEY_SEPARATOR}{request_id}"))
    }

    /// Parses a key as carried by the `X-Request-Key` header.
    ///
    /// Returns `None` if the separator is missing.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        raw.contains(KEY_SEPARATOR).then(|| Self(raw.to_string()))
    }

    /// Returns the tracking id portion.
    #[inline]
    #[must_use]
    pub fn tracking_id(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(tracking, _)| tracking)
    }

    /// Returns the request id portion.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or("", |(_, request)| request)
    }

    /// Returns a key with the same tracking id and `request_id` as suffix.
    ///
    /// Used to address a subscription made by an earlier request on the
    /// same connection (e.g. from an unsubscribe request).
    #[must_use]
    pub fn derive(&self, request_id: &str) -> Self {
        Self(format!("{}{KEY_SEPARATOR}{request_id}", self.tracking_id()))
    }

    /// Returns `true` if this key is rooted at `tracking_id`.
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, tracking_id: &TrackingId) -> bool {
        self.tracking_id() == tracking_id.as_str()
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Process-local handle for a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_format() {
        let tracking = TrackingId::new("default");
        let key = tracking.request_key("125");
        assert_eq!(key.as_str(), "default#125");
        assert_eq!(key.tracking_id(), "default");
        assert_eq!(key.request_id(), "125");
    }

    #[test]
    fn test_derive_keeps_tracking_prefix() {
        let key = RequestKey::parse("bar#10").expect("valid key");
        let derived = key.derive("2");
        assert_eq!(derived.as_str(), "bar#2");
        assert!(derived.belongs_to(&TrackingId::new("bar")));
        assert!(!derived.belongs_to(&TrackingId::new("ba")));
    }

    #[test]
    fn test_parse_requires_separator() {
        assert!(RequestKey::parse("no-separator").is_none());
        assert!(RequestKey::parse("a#b").is_some());
    }

    #[test]
    fn test_generated_tracking_ids_are_unique() {
        let a = TrackingId::generate();
        let b = TrackingId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_connection_ids_increase() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("conn-"));
    }
}
