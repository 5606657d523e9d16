//! Responders and the reusable subscription responder.
//!
//! A [`Responder`] writes an initial reply. Wrapping it in a
//! [`ReusableResponder`] (via [`ResponseMediator::subscribe`] or
//! [`ResponseMediator::subscribe_topic`]) additionally captures the
//! [`ResponseWriter`] it was handed, so later pushes reach the same client
//! under the same request id.
//!
//! [`ResponseMediator::subscribe`]: super::ResponseMediator::subscribe
//! [`ResponseMediator::subscribe_topic`]: super::ResponseMediator::subscribe_topic

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestKey;
use crate::transport::ResponseWriter;

use super::ResponseMediator;

// ============================================================================
// Responder
// ============================================================================

/// Writes a reply to a [`ResponseWriter`].
pub trait Responder: Send + Sync {
    /// Writes the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply could not be sent.
    fn write_response(&self, writer: &mut ResponseWriter) -> Result<()>;
}

impl<F> Responder for F
where
    F: Fn(&mut ResponseWriter) -> Result<()> + Send + Sync,
{
    fn write_response(&self, writer: &mut ResponseWriter) -> Result<()> {
        self(writer)
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Fixed reply: status, optional media type and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    status: StatusCode,
    media_type: Option<String>,
    body: Vec<u8>,
}

impl Reply {
    /// Reply with only a status.
    #[inline]
    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            media_type: None,
            body: Vec::new(),
        }
    }

    /// Reply with a body of the given media type.
    #[inline]
    #[must_use]
    pub fn with_body(
        status: StatusCode,
        media_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            media_type: Some(media_type.into()),
            body: body.into(),
        }
    }

    /// Reply with `value` serialized as `application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self> {
        Ok(Self::with_body(status, "application/json", serde_json::to_vec(value)?))
    }

    /// Reply with a `text/plain` body.
    #[inline]
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::with_body(status, "text/plain", body.into().into_bytes())
    }
}

impl Responder for Reply {
    fn write_response(&self, writer: &mut ResponseWriter) -> Result<()> {
        let Some(media_type) = &self.media_type else {
            writer.write_header(self.status);
            return Ok(());
        };

        let value = HeaderValue::from_str(media_type)
            .map_err(|e| Error::protocol(format!("invalid media type {media_type:?}: {e}")))?;
        writer.headers_mut().insert(CONTENT_TYPE, value);
        writer.write_header(self.status);
        writer.write(&self.body)?;
        Ok(())
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Where a subscription receives broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Addressed by subscriber name via [`ResponseMediator::write`].
    Plain,
    /// Member of a topic, addressed via [`ResponseMediator::write_topic`].
    Topic(String),
}

/// One active subscription as held by the mediator.
pub(crate) struct Subscription {
    pub(crate) key: RequestKey,
    pub(crate) name: String,
    pub(crate) scope: SubscriptionScope,
    pub(crate) hello: Option<Vec<u8>>,
    pub(crate) bye: Option<Vec<u8>>,
    writer: OnceLock<ResponseWriter>,
}

impl Subscription {
    pub(crate) fn new(
        key: RequestKey,
        name: String,
        scope: SubscriptionScope,
        hello: Option<Vec<u8>>,
        bye: Option<Vec<u8>>,
    ) -> Self {
        Self {
            key,
            name,
            scope,
            hello,
            bye,
            writer: OnceLock::new(),
        }
    }

    /// Keeps the first writer handed to this subscription.
    fn capture(&self, writer: &ResponseWriter) {
        if self.writer.set(writer.clone()).is_ok() {
            debug!(key = %self.key, name = %self.name, "Subscription writer captured");
        }
    }

    /// Pushes `data` to the captured writer.
    ///
    /// Returns `None` if the initial reply has not been written yet.
    pub(crate) fn push(&self, data: &[u8]) -> Option<Result<usize>> {
        self.writer.get().map(|writer| writer.write(data))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("captured", &self.writer.get().is_some())
            .finish()
    }
}

// ============================================================================
// ReusableResponder
// ============================================================================

/// Responder that registers its writer for later pushes.
///
/// The first [`write_response`](Responder::write_response) delegates the
/// initial reply to the wrapped responder, captures the writer (with the
/// status and headers that reply set), then broadcasts the subscription's
/// `hello` payload (if any) to its scope.
pub struct ReusableResponder {
    subscription: Arc<Subscription>,
    responder: Box<dyn Responder>,
    mediator: ResponseMediator,
}

impl ReusableResponder {
    pub(crate) fn new(
        subscription: Arc<Subscription>,
        responder: Box<dyn Responder>,
        mediator: ResponseMediator,
    ) -> Self {
        Self {
            subscription,
            responder,
            mediator,
        }
    }

    /// Returns the subscriber name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.subscription.name
    }

    /// Returns the subscription key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &RequestKey {
        &self.subscription.key
    }

    /// Returns the subscription scope.
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &SubscriptionScope {
        &self.subscription.scope
    }

    /// Pushes a subsequent frame to this subscriber only.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the initial reply was never written
    /// - [`Error::ConnectionClosed`] if the connection is gone
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.subscription
            .push(data)
            .unwrap_or_else(|| Err(Error::protocol("subscription has no writer yet")))
    }
}

impl Responder for ReusableResponder {
    fn write_response(&self, writer: &mut ResponseWriter) -> Result<()> {
        self.responder.write_response(writer)?;
        self.subscription.capture(writer);

        if let Some(hello) = &self.subscription.hello {
            let result = match &self.subscription.scope {
                SubscriptionScope::Plain => self.mediator.write("*", hello),
                SubscriptionScope::Topic(_) => self.mediator.write_topic("*", hello),
            };
            if let Err(e) = result {
                warn!(key = %self.subscription.key, error = %e, "Failed to broadcast hello");
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ReusableResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusableResponder")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
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

    use crate::protocol::DefaultCodec;
    use crate::transport::{FrameKind, FrameSink};

    fn writer(id: &str) -> (ResponseWriter, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = ResponseWriter::new(
            id,
            FrameKind::Text,
            FrameSink::from_sender(tx),
            Arc::new(DefaultCodec),
        );
        (writer, rx)
    }

    fn text(rx: &mut mpsc::UnboundedReceiver<Message>) -> String {
        match rx.try_recv() {
            Ok(Message::Text(t)) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_status_only() {
        let (mut w, mut rx) = writer("3");
        Reply::status(StatusCode::NOT_FOUND)
            .write_response(&mut w)
            .expect("reply");
        assert_eq!(text(&mut rx), r#"{"code":404,"id":"3"}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reply_json() {
        let (mut w, mut rx) = writer("1");
        Reply::json(StatusCode::OK, &serde_json::json!({"pong": 0}))
            .expect("json")
            .write_response(&mut w)
            .expect("reply");
        assert_eq!(
            text(&mut rx),
            r#"{"code":200,"id":"1","type":"application/json"}{"pong":0}"#
        );
    }

    #[test]
    fn test_closure_responder() {
        let (mut w, mut rx) = writer("4");
        let responder = |w: &mut ResponseWriter| -> Result<()> {
            w.write_header(StatusCode::ACCEPTED);
            Ok(())
        };
        responder.write_response(&mut w).expect("reply");
        assert_eq!(text(&mut rx), r#"{"code":202,"id":"4"}"#);
    }

    #[test]
    fn test_reusable_responder_pushes_after_initial_reply() {
        let mediator = ResponseMediator::new();
        let key = RequestKey::parse("t#1").expect("key");
        let responder = mediator.subscribe(
            key,
            "alice",
            Reply::text(StatusCode::OK, "welcome"),
            None,
            None,
        );

        assert!(responder.write(b"early").is_err());

        let (mut w, mut rx) = writer("1");
        responder.write_response(&mut w).expect("reply");
        responder.write(b"later").expect("push");

        assert_eq!(text(&mut rx), r#"{"code":200,"id":"1","type":"text/plain"}welcome"#);
        assert_eq!(text(&mut rx), r#"{"code":200,"id":"1","type":"text/plain"}later"#);
        assert_eq!(responder.name(), "alice");
        assert_eq!(responder.scope(), &SubscriptionScope::Plain);
    }
}
