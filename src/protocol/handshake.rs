//! Version handshake messages.
//!
//! The first frame in each direction is a plain JSON object (no body):
//!
//! | Direction | Message |
//! |-----------|---------|
//! | Client → Server | `{"version":"2.0"}` |
//! | Server → Client (ok) | `{"version":"2.0","trackingID":"<id>"}` |
//! | Server → Client (error) | `{"version":"2.0","error":"version_mismatch"}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::TrackingId;

// ============================================================================
// Constants
// ============================================================================

/// Error marker sent when the client's version is not supported.
pub const VERSION_MISMATCH: &str = "version_mismatch";

// ============================================================================
// HandshakeRequest
// ============================================================================

/// Handshake sent by the client right after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Protocol version spoken by the client.
    pub version: String,
}

impl HandshakeRequest {
    /// Creates a handshake request for `version`.
    #[inline]
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Parses the first inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeMalformed`] if the frame is not a handshake
    /// request.
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::handshake_malformed(e.to_string()))
    }
}

// ============================================================================
// HandshakeResponse
// ============================================================================

/// Handshake reply sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Protocol version spoken by the server.
    pub version: String,

    /// Tracking id assigned to the connection (success only).
    #[serde(rename = "trackingID", default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<TrackingId>,

    /// Error marker (failure only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Successful handshake carrying the assigned tracking id.
    #[inline]
    #[must_use]
    pub fn accepted(version: impl Into<String>, tracking_id: TrackingId) -> Self {
        Self {
            version: version.into(),
            tracking_id: Some(tracking_id),
            error: None,
        }
    }

    /// Failed handshake for an unsupported client version.
    #[inline]
    #[must_use]
    pub fn version_mismatch(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tracking_id: None,
            error: Some(VERSION_MISMATCH.to_string()),
        }
    }

    /// Validates a reply received by the client.
    ///
    /// Returns the tracking id assigned by the server.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeMalformed`] if the reply does not parse or lacks a tracking id
    /// - [`Error::HandshakeVersionMismatch`] if the server reported an error or a
    ///   different version
    pub fn validate(data: &[u8], expected_version: &str) -> Result<TrackingId> {
        let response: Self =
            serde_json::from_slice(data).map_err(|e| Error::handshake_malformed(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(Error::version_mismatch(expected_version, error));
        }
        if response.version != expected_version {
            return Err(Error::version_mismatch(expected_version, response.version));
        }

        response
            .tracking_id
            .ok_or_else(|| Error::handshake_malformed("missing trackingID"))
    }
}

// ============================================================================
// Tests
// ============================================================================
