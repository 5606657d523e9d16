//! Synthetic HTTP requests built from inbound frames.
//!
//! The dispatcher sees an ordinary [`http::Request`] whose body is either
//! fixed (single frame) or streamed (a continued series of frames).
//!
//! # Request Synthesis
//!
//! | Frame header | Request field |
//! |--------------|---------------|
//! | `path` | URI, appended to the connection's base URI |
//! | `method` | method (default `GET`) |
//! | `type` | `Content-Type` |
//! | `accept` | `Accept` |
//! | `headers` | copied verbatim |
//! | `id` | `X-Request-Key: <trackingID>#<id>` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::header::{
    ACCEPT, CONNECTION, CONTENT_TYPE, TRANSFER_ENCODING, UPGRADE,
};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Method, Request, Uri};

use crate::error::{Error, Result};
use crate::identifiers::{RequestKey, TrackingId};

use super::codec::Frame;
use super::{
    HEADER_ACCEPT, HEADER_EXTRA, HEADER_METHOD, HEADER_PATH, HEADER_REQUEST_KEY, HEADER_TYPE,
    TRACKING_ID_PARAMS,
};

// ============================================================================
// Body
// ============================================================================

/// Request body handed to the dispatcher.
///
/// A fixed body holds the bytes of a single frame. A streaming body yields
/// fragments as they arrive and ends when the final fragment is received.
#[derive(Debug)]
pub struct Body {
    inner: BodyInner,
}

#[derive(Debug)]
enum BodyInner {
    Full(Option<Vec<u8>>),
    Streaming(mpsc::UnboundedReceiver<Vec<u8>>),
}

impl Body {
    /// Creates a fixed body.
    #[inline]
    #[must_use]
    pub fn full(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: BodyInner::Full(Some(bytes.into())),
        }
    }

    /// Creates an empty fixed body.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::full(Vec::new())
    }

    /// Creates a streaming body and the sender that feeds it.
    #[must_use]
    pub fn streaming() -> (BodySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BodySender { tx },
            Self {
                inner: BodyInner::Streaming(rx),
            },
        )
    }

    /// Returns `true` if the body is fed by a continued series.
    #[inline]
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner, BodyInner::Streaming(_))
    }

    /// Returns the next chunk, or `None` at end of body.
    ///
    /// Waits for further fragments on a streaming body.
    pub async fn chunk(&mut self) -> Option<Vec<u8>> {
        match &mut self.inner {
            BodyInner::Full(bytes) => bytes.take().filter(|b| !b.is_empty()),
            BodyInner::Streaming(rx) => rx.recv().await,
        }
    }

    /// Reads the whole body.
    pub async fn collect(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// BodySender
// ============================================================================

/// Producer half of a streaming [`Body`].
///
/// Dropping or closing the sender signals end of body.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl BodySender {
    /// Appends a fragment to the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the consumer dropped the body.
    pub fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx.send(bytes).map_err(|_| Error::ConnectionClosed)
    }

    /// Ends the body.
    #[inline]
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// Request Synthesis
// ============================================================================

/// Builds the request dispatched for `frame`.
///
/// # Arguments
///
/// * `base_uri` - Path of the upgrade request, without trailing slash
/// * `tracking_id` - Connection's tracking id
/// * `frame` - Decoded frame (headers only are used)
/// * `body` - Fixed or streaming body
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] if the method, URI or a header is not
/// valid HTTP.
pub fn build_request(
    base_uri: &str,
    tracking_id: &TrackingId,
    frame: &Frame,
    body: Body,
) -> Result<Request<Body>> {
    let request_id = frame.id();
    let invalid = |message: String| Error::invalid_request(request_id, message);

    let method = match frame.string_header(HEADER_METHOD) {
        Some(m) if !m.is_empty() => {
            Method::from_bytes(m.as_bytes()).map_err(|e| invalid(format!("method: {e}")))?
        }
        _ => Method::GET,
    };

    let uri = format!(
        "{base_uri}{}",
        frame.string_header(HEADER_PATH).unwrap_or_default()
    );
    let uri: Uri = uri.parse().map_err(|e| invalid(format!("uri {uri:?}: {e}")))?;

    let streaming = body.is_streaming();
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .map_err(|e| invalid(e.to_string()))?;

    let headers = request.headers_mut();
    let key = RequestKey::new(tracking_id, request_id);
    headers.insert(
        HEADER_REQUEST_KEY,
        HeaderValue::from_str(key.as_str()).map_err(|e| invalid(format!("request key: {e}")))?,
    );

    if let Some(media_type) = frame.string_header(HEADER_TYPE) {
        headers.append(
            CONTENT_TYPE,
            HeaderValue::from_str(media_type).map_err(|e| invalid(format!("type: {e}")))?,
        );
    }
    if let Some(accept) = frame.string_header(HEADER_ACCEPT) {
        headers.append(
            ACCEPT,
            HeaderValue::from_str(accept).map_err(|e| invalid(format!("accept: {e}")))?,
        );
    }

    if let Some(Value::Object(extra)) = frame.headers.get(HEADER_EXTRA) {
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("header {name:?}: {e}")))?;
            let value = match value {
                Value::String(s) => HeaderValue::from_str(s),
                other => HeaderValue::from_str(&other.to_string()),
            }
            .map_err(|e| invalid(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }
    }

    if streaming {
        headers.append(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }

    Ok(request)
}

/// Returns the request key attached to a synthesized request.
#[must_use]
pub fn request_key<B>(request: &Request<B>) -> Option<RequestKey> {
    request
        .headers()
        .get(HEADER_REQUEST_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(RequestKey::parse)
}

// ============================================================================
// Upgrade Helpers
// ============================================================================

/// Checks if `request` asks for a WebSocket upgrade.
///
/// Requires `GET`, a `Connection` header listing `Upgrade` and an
/// `Upgrade: websocket` header (all case-insensitive).
#[must_use]
pub fn is_websocket_upgrade_requested<B>(request: &Request<B>) -> bool {
    if request.method() != Method::GET {
        return false;
    }

    let headers = request.headers();
    let upgrading = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !upgrading {
        return false;
    }

    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Returns the upgrade request's path without a trailing slash.
#[must_use]
pub fn base_uri(uri: &Uri) -> String {
    uri.path().trim_end_matches('/').to_string()
}

/// Returns the tracking id supplied in the upgrade query, if any.
///
/// The first known parameter with a non-empty value wins.
#[must_use]
pub fn tracking_id(uri: &Uri) -> Option<TrackingId> {
    let query = uri.query()?;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    TRACKING_ID_PARAMS.iter().find_map(|param| {
        pairs
            .iter()
            .find(|(name, value)| name == param && !value.is_empty())
            .map(|(_, value)| TrackingId::new(value.as_str()))
    })
}

// ============================================================================
// Tests
// ============================================================================
