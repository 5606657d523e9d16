//! Error types for wsmux.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsmux::{ClientRequest, ClientTransport, Result};
//!
//! async fn example(transport: &ClientTransport) -> Result<()> {
//!     let reply = transport.submit(&ClientRequest::get("/ping")).await?;
//!     println!("{}", reply.code);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Wire | [`Error::Decode`], [`Error::Protocol`], [`Error::InvalidRequest`] |
//! | Handshake | [`Error::HandshakeVersionMismatch`], [`Error::HandshakeMalformed`], [`Error::Upgrade`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Write`] |
//! | Client | [`Error::RequestTimeout`], [`Error::UnknownContentType`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Every failure is scoped to one connection or one request; nothing here
/// is fatal to the process hosting the server.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a server or client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Wire Errors
    // ========================================================================
    /// Frame header is not a syntactically valid JSON object.
    ///
    /// The frame is dropped; the connection stays open.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A frame could not be turned into a request.
    #[error("Invalid request {request_id}: {message}")]
    InvalidRequest {
        /// Request id carried by the offending frame.
        request_id: String,
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Peer speaks a different protocol version.
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    HandshakeVersionMismatch {
        /// Version this side supports.
        expected: String,
        /// Version (or error marker) received from the peer.
        actual: String,
    },

    /// First frame was not a valid handshake message.
    #[error("Malformed handshake: {message}")]
    HandshakeMalformed {
        /// Description of the problem.
        message: String,
    },

    /// HTTP to WebSocket upgrade failed.
    #[error("WebSocket upgrade failed: {message}")]
    Upgrade {
        /// Description of the upgrade failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed.
    ///
    /// Returned when writing to a connection whose writer has gone away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing a frame to the socket failed.
    ///
    /// Reported by a connection's writer loop; the connection is gone.
    #[error("Write failed: {message}")]
    Write {
        /// Description of the write failure.
        message: String,
    },

    // ========================================================================
    // Client Errors
    // ========================================================================
    /// Synchronous submit timed out.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request id that timed out.
        request_id: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Reply carried a media type with no registered consumer.
    #[error("No consumer for media type: {media_type:?}")]
    UnknownContentType {
        /// The declared media type.
        media_type: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    #[inline]
    pub fn invalid_request(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            request_id: request_id.into(),
            message: message.into(),
        }
    }

    /// Creates a version mismatch error.
    #[inline]
    pub fn version_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::HandshakeVersionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a malformed handshake error.
    #[inline]
    pub fn handshake_malformed(message: impl Into<String>) -> Self {
        Self::HandshakeMalformed {
            message: message.into(),
        }
    }

    /// Creates an upgrade error.
    #[inline]
    pub fn upgrade(message: impl Into<String>) -> Self {
        Self::Upgrade {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a write error.
    #[inline]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id: request_id.into(),
            timeout_ms,
        }
    }

    /// Creates an unknown content type error.
    #[inline]
    pub fn unknown_content_type(media_type: impl Into<String>) -> Self {
        Self::UnknownContentType {
            media_type: media_type.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a handshake error.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeVersionMismatch { .. } | Self::HandshakeMalformed { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::Write { .. }
                | Self::Upgrade { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. } | Self::Decode { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = Error::version_mismatch("2.0", "1.0");
        assert_eq!(
            err.to_string(),
            "Protocol version mismatch: expected 2.0, got 1.0"
        );
        assert!(err.is_handshake_error());
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout("7", 5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
        assert_eq!(timeout_err.to_string(), "Request 7 timed out after 5000ms");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::write("broken pipe").is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::request_timeout("1", 10).is_recoverable());
        assert!(Error::decode("bad json").is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_unknown_content_type_display() {
        let err = Error::unknown_content_type("application/xml");
        assert_eq!(
            err.to_string(),
            "No consumer for media type: \"application/xml\""
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
