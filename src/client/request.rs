//! Client request builder.
//!
//! A [`ClientRequest`] describes one HTTP-shaped call and serializes into one
//! or more wire frames:
//!
//! ```text
//! {"id":"4","method":"POST","path":"/echo?lang=es","type":"application/json"}{"echo":"hola"}
//! ```
//!
//! With [`fragment_size`](ClientRequest::fragment_size) the body is split
//! over several frames, each but the last carrying `"continue":true`.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::http::Method;

use crate::error::Result;
use crate::protocol::{
    Codec, HEADER_ACCEPT, HEADER_CONTINUE, HEADER_EXTRA, HEADER_ID, HEADER_METHOD, HEADER_PATH,
    HEADER_TYPE, Headers,
};

// ============================================================================
// ClientRequest
// ============================================================================

/// One request to submit over a [`ClientTransport`](super::ClientTransport).
#[derive(Debug, Clone)]
pub struct ClientRequest {
    method: Method,
    path: String,
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    media_type: Option<String>,
    accept: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    fragment_size: usize,
}

// ============================================================================
// ClientRequest - Constructors
// ============================================================================

impl ClientRequest {
    /// Creates a request for `path`, which may contain `{name}` placeholders.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: Vec::new(),
            query: Vec::new(),
            media_type: None,
            accept: None,
            headers: Vec::new(),
            body: Vec::new(),
            fragment_size: 0,
        }
    }

    /// Creates a `GET` request.
    #[inline]
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a `POST` request.
    #[inline]
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Creates a `PUT` request.
    #[inline]
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Creates a `DELETE` request.
    #[inline]
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

// ============================================================================
// ClientRequest - Builder
// ============================================================================

impl ClientRequest {
    /// Substitutes `{name}` in the path with the percent-encoded `value`.
    #[must_use]
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.push((name.into(), value.into()));
        self
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets the body media type (the `type` header).
    #[must_use]
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Sets the accepted response media type.
    #[must_use]
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Adds an extra HTTP header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a `text/plain` body.
    #[must_use]
    pub fn text(self, body: impl Into<String>) -> Self {
        self.media_type("text/plain").body(body.into().into_bytes())
    }

    /// Sets `value` as an `application/json` body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.media_type("application/json").body(body))
    }

    /// Splits bodies longer than `size` bytes over several frames.
    ///
    /// Zero disables fragmentation.
    #[must_use]
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }
}

// ============================================================================
// ClientRequest - Accessors
// ============================================================================

impl ClientRequest {
    /// Returns the method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the body.
    #[inline]
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Returns the path with parameters substituted and the query appended.
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = self.path.clone();
        for (name, value) in &self.path_params {
            path = path.replace(&format!("{{{name}}}"), &urlencoding::encode(value));
        }

        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            path.push('?');
            path.push_str(&query);
        }

        path
    }
}

// ============================================================================
// ClientRequest - Serialization
// ============================================================================

impl ClientRequest {
    /// Builds the frame headers for request `id`.
    #[must_use]
    pub fn frame_headers(&self, id: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(HEADER_ID.to_string(), Value::from(id));
        headers.insert(HEADER_METHOD.to_string(), Value::from(self.method.as_str()));
        headers.insert(HEADER_PATH.to_string(), Value::from(self.path()));

        if let Some(media_type) = &self.media_type {
            headers.insert(HEADER_TYPE.to_string(), Value::from(media_type.as_str()));
        }
        if let Some(accept) = &self.accept {
            headers.insert(HEADER_ACCEPT.to_string(), Value::from(accept.as_str()));
        }
        if !self.headers.is_empty() {
            let extra: Map<String, Value> = self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
                .collect();
            headers.insert(HEADER_EXTRA.to_string(), Value::Object(extra));
        }

        headers
    }

    /// Encodes the request as wire frames for request `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec fails to encode the headers.
    pub fn encode(&self, id: &str, codec: &dyn Codec) -> Result<Vec<Vec<u8>>> {
        let headers = self.frame_headers(id);

        if self.fragment_size == 0 || self.body.len() <= self.fragment_size {
            return Ok(vec![codec.encode(&headers, &self.body)?]);
        }

        let mut continued = headers.clone();
        continued.insert(HEADER_CONTINUE.to_string(), Value::Bool(true));

        let chunks: Vec<&[u8]> = self.body.chunks(self.fragment_size).collect();
        let last = chunks.len() - 1;

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let headers = if i < last { &continued } else { &headers };
                codec.encode(headers, chunk)
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
