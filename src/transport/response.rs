//! Synthetic response writer.
//!
//! Handlers write status, headers and body exactly as they would to an HTTP
//! response; each body write becomes one frame `{id, code, type?}` + body on
//! the originating connection.
//!
//! A writer is cheap to clone. Clones share the connection's [`FrameSink`],
//! so a writer captured for a subscription keeps pushing frames with the
//! same `id` long after the initial reply.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tracing::{trace, warn};

use crate::error::Result;
use crate::protocol::{Codec, HEADER_CODE, HEADER_ID, HEADER_TYPE, Headers};

use super::sink::{FrameKind, FrameSink};

// ============================================================================
// ResponseWriter
// ============================================================================

/// Response writer bound to one request id on one connection.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    /// Correlation id echoed in every frame.
    id: String,
    /// Message kind the request arrived on.
    kind: FrameKind,
    /// Status reported in the `code` header.
    status: StatusCode,
    /// Response headers (only `Content-Type` reaches the wire).
    headers: HeaderMap,
    /// Connection's serialized writer.
    sink: FrameSink,
    /// Codec used to encode frames.
    codec: Arc<dyn Codec>,
}

impl ResponseWriter {
    /// Creates a writer for request `id`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: FrameKind,
        sink: FrameSink,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            sink,
            codec,
        }
    }

    /// Returns the request id this writer answers.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.id
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the response headers for modification.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns `true` if the underlying connection is gone.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Sets the status.
    ///
    /// Without a `Content-Type` there is no body to wait for, so a
    /// header-only frame is flushed immediately.
    pub fn write_header(&mut self, status: StatusCode) {
        self.status = status;

        if !self.headers.contains_key(CONTENT_TYPE)
            && let Err(e) = self.send(&[])
        {
            warn!(id = %self.id, error = %e, "Failed to flush response header");
        }
    }

    /// Sends `body` as one frame.
    ///
    /// May be called any number of times; each call is a separate frame
    /// with the same `id`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Json`] if the headers cannot be encoded
    /// - [`crate::Error::ConnectionClosed`] if the connection is gone
    pub fn write(&self, body: &[u8]) -> Result<usize> {
        self.send(body)?;
        Ok(body.len())
    }

    /// Builds the frame headers `{id, code, type?}`.
    #[must_use]
    pub fn frame_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(HEADER_ID.to_string(), Value::from(self.id.as_str()));
        headers.insert(HEADER_CODE.to_string(), Value::from(self.status.as_u16()));

        if let Some(media_type) = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            headers.insert(HEADER_TYPE.to_string(), Value::from(media_type));
        }

        headers
    }

    fn send(&self, body: &[u8]) -> Result<()> {
        let data = self.codec.encode(&self.frame_headers(), body)?;
        trace!(id = %self.id, code = self.status.as_u16(), len = body.len(), "Response frame");
        self.sink.send_frame(self.kind, data)
    }
}

// ============================================================================
// Tests
// ============================================================================
