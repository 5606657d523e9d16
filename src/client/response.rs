//! Client replies and content consumers.
//!
//! The reply's `type` header selects a consumer that turns the raw body into
//! a [`Payload`].
//!
//! | Media type | Payload |
//! |------------|---------|
//! | `application/json`, `*/*+json` | [`Payload::Json`] |
//! | `text/plain` | [`Payload::Text`] |
//! | `application/octet-stream` | [`Payload::Bytes`] |
//! | none, empty body | [`Payload::Empty`] |
//! | none, with body | [`Payload::Bytes`] |
//!
//! Media type parameters such as `; charset=utf-8` are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::Frame;

// ============================================================================
// Constants
// ============================================================================

/// JSON media type.
pub const JSON_MIME: &str = "application/json";

/// Plain text media type.
pub const TEXT_MIME: &str = "text/plain";

/// Raw bytes media type.
pub const BYTES_MIME: &str = "application/octet-stream";

/// Status reported when a reply carries no `code`.
const DEFAULT_CODE: u16 = 200;

// ============================================================================
// Payload
// ============================================================================

/// Decoded reply body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON document.
    Json(Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// No body.
    Empty,
}

impl Payload {
    /// Returns the JSON value, if this is a JSON payload.
    #[inline]
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the text, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` for [`Payload::Empty`].
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

// ============================================================================
// ClientResponse
// ============================================================================

/// Reply to a submitted request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    /// Request id the reply answers.
    pub id: String,
    /// Status code.
    pub code: u16,
    /// Declared media type, if any.
    pub media_type: Option<String>,
    /// Decoded body.
    pub payload: Payload,
}

impl ClientResponse {
    /// Returns `true` for a 2xx status.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Deserializes a JSON payload into `T`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownContentType`] if the payload is not JSON
    /// - [`Error::Json`] if the document does not match `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let Payload::Json(value) = &self.payload else {
            return Err(Error::unknown_content_type(
                self.media_type.as_deref().unwrap_or_default(),
            ));
        };
        Ok(serde_json::from_value(value.clone())?)
    }
}

// ============================================================================
// Consumers
// ============================================================================

/// Converts a raw body into a [`Payload`].
pub type Consumer = Arc<dyn Fn(&[u8]) -> Result<Payload> + Send + Sync>;

/// Consumers keyed by media type.
#[derive(Clone)]
pub struct Consumers {
    by_type: FxHashMap<String, Consumer>,
}

impl Consumers {
    /// Creates the default JSON, text and bytes consumers.
    #[must_use]
    pub fn new() -> Self {
        let mut consumers = Self {
            by_type: FxHashMap::default(),
        };
        consumers.register(JSON_MIME, Arc::new(consume_json));
        consumers.register(TEXT_MIME, Arc::new(consume_text));
        consumers.register(BYTES_MIME, Arc::new(consume_bytes));
        consumers
    }

    /// Registers (or replaces) the consumer for `media_type`.
    pub fn register(&mut self, media_type: &str, consumer: Consumer) {
        self.by_type.insert(essence(media_type), consumer);
    }

    /// Decodes `body` according to `media_type`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownContentType`] if no consumer matches
    /// - whatever the matching consumer returns
    pub fn consume(&self, media_type: Option<&str>, body: &[u8]) -> Result<Payload> {
        let Some(media_type) = media_type.filter(|t| !t.is_empty()) else {
            return Ok(if body.is_empty() {
                Payload::Empty
            } else {
                Payload::Bytes(body.to_vec())
            });
        };

        let key = essence(media_type);
        let consumer = match self.by_type.get(&key) {
            Some(consumer) => consumer,
            None if key.ends_with("+json") => self
                .by_type
                .get(JSON_MIME)
                .ok_or_else(|| Error::unknown_content_type(media_type))?,
            None => return Err(Error::unknown_content_type(media_type)),
        };

        if body.is_empty() {
            return Ok(Payload::Empty);
        }
        consumer(body)
    }

    /// Builds a [`ClientResponse`] from a reply frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be consumed.
    pub fn response(&self, frame: Frame) -> Result<ClientResponse> {
        let id = frame.id().to_string();
        let code = frame.code().unwrap_or(DEFAULT_CODE);
        let media_type = frame.media_type().map(str::to_string);
        let payload = self.consume(media_type.as_deref(), &frame.body)?;

        Ok(ClientResponse {
            id,
            code,
            media_type,
            payload,
        })
    }
}

impl Default for Consumers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Consumers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort();
        f.debug_struct("Consumers").field("types", &types).finish()
    }
}

/// Lowercased media type without parameters.
fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn consume_json(body: &[u8]) -> Result<Payload> {
    Ok(Payload::Json(serde_json::from_slice(body)?))
}

fn consume_bytes(body: &[u8]) -> Result<Payload> {
    Ok(Payload::Bytes(body.to_vec()))
}

fn consume_text(body: &[u8]) -> Result<Payload> {
    String::from_utf8(body.to_vec())
        .map(Payload::Text)
        .map_err(|e| Error::decode(format!("text body is not UTF-8: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
