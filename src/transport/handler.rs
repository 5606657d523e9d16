//! Server-side protocol handler and per-connection read loop.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Connecting ──► Handshaking ──► Serving ──► Closed
//!     │               │
//!     │               └── bad version / malformed ──► Closed
//!     └── upgrade rejected ──► HTTP 500
//! ```
//!
//! 1. `serve` upgrades the stream, picks the tracking id (query parameter
//!    or a fresh UUID) and registers the connection
//! 2. The first frame must be `{"version": "2.0"}`
//! 3. Every later frame is decoded and dispatched as a synthetic request;
//!    `continue: true` frames feed a streaming body
//! 4. On close the connection is deregistered and all of its subscriptions
//!    are cancelled
//!
//! # Dispatch
//!
//! Each request runs on its own task so a slow handler never blocks the
//! read loop. Replies flow through the connection's [`FrameSink`].

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::http::{Request, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, TrackingId};
use crate::mediator::ResponseMediator;
use crate::protocol::{
    Body, BodySender, Codec, DefaultCodec, Frame, HandshakeRequest, HandshakeResponse,
    PROTOCOL_VERSION, base_uri, build_request, tracking_id,
};

use super::heartbeat::Heartbeat;
use super::registry::ConnectionRegistry;
use super::response::ResponseWriter;
use super::sink::{FrameKind, FrameSink};

// ============================================================================
// Constants
// ============================================================================

/// Time a connection asked to close waits for the peer's close reply.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Dispatcher
// ============================================================================

/// Request handler invoked for every synthesized request.
///
/// Implemented for async closures taking `(Request<Body>, ResponseWriter)`.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Handles one request and writes its reply to `response`.
    async fn dispatch(&self, request: Request<Body>, response: ResponseWriter);
}

#[async_trait]
impl<F, Fut> Dispatcher for F
where
    F: Fn(Request<Body>, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn dispatch(&self, request: Request<Body>, response: ResponseWriter) {
        self(request, response).await;
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Protocol handler configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Ping interval; `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
    /// Frame codec.
    pub codec: Arc<dyn Codec>,
    /// Subscription mediator shared with the application.
    pub mediator: ResponseMediator,
    /// Protocol version accepted and advertised.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat: None,
            codec: Arc::new(DefaultCodec),
            mediator: ResponseMediator::new(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    heartbeat: Option<Duration>,
    codec: Option<Arc<dyn Codec>>,
    mediator: Option<ResponseMediator>,
    version: Option<String>,
}

impl ServerConfigBuilder {
    /// Enables the heartbeat with the given ping interval.
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Sets the frame codec.
    #[must_use]
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Sets the response mediator.
    #[must_use]
    pub fn mediator(mut self, mediator: ResponseMediator) -> Self {
        self.mediator = Some(mediator);
        self
    }

    /// Overrides the protocol version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the heartbeat interval is zero or the
    /// version is empty.
    pub fn build(self) -> Result<ServerConfig> {
        if self.heartbeat.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::config("heartbeat interval must be positive"));
        }

        let version = self
            .version
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());
        if version.is_empty() {
            return Err(Error::config("protocol version must not be empty"));
        }

        Ok(ServerConfig {
            heartbeat: self.heartbeat,
            codec: self.codec.unwrap_or_else(|| Arc::new(DefaultCodec)),
            mediator: self.mediator.unwrap_or_default(),
            version,
        })
    }
}

// ============================================================================
// ProtocolHandler
// ============================================================================

/// Serves multiplexed connections.
///
/// Cheap to clone; clones share the registry and mediator.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
}

/// Upgrade request details captured during the WebSocket handshake.
#[derive(Debug, Default)]
struct UpgradeInfo {
    base_uri: String,
    tracking_id: Option<TrackingId>,
}

/// Read loop state.
enum Phase {
    Handshaking,
    Serving,
}

/// State owned by one connection's read loop.
struct Session {
    id: ConnectionId,
    tracking_id: TrackingId,
    base_uri: String,
    sink: FrameSink,
    dispatcher: Arc<dyn Dispatcher>,
    /// Fired by [`ProtocolHandler::shutdown`].
    cancel: Arc<Notify>,
    /// Open continuations by request id.
    continued: FxHashMap<String, BodySender>,
}

// ============================================================================
// ProtocolHandler - Constructor & Accessors
// ============================================================================

impl ProtocolHandler {
    /// Creates a handler from `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Returns the codec used for every frame.
    #[inline]
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.config.codec
    }

    /// Returns the response mediator.
    #[inline]
    #[must_use]
    pub fn mediator(&self) -> &ResponseMediator {
        &self.config.mediator
    }

    /// Returns the live connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes every live connection.
    ///
    /// Each connection then runs its normal close cleanup, within a short
    /// grace period even if the peer never answers the close.
    pub fn shutdown(&self) {
        info!(connections = self.registry.len(), "Protocol handler shutting down");
        self.registry.close_all();
    }
}

// ============================================================================
// ProtocolHandler - Serve
// ============================================================================

impl ProtocolHandler {
    /// Upgrades `stream` and serves it until the connection closes.
    ///
    /// # Errors
    ///
    /// - [`Error::Upgrade`] if the stream is not a valid WebSocket upgrade;
    ///   the peer is answered with HTTP 500
    /// - [`Error::Write`] if writing to the socket failed; the connection
    ///   has been cleaned up
    pub async fn serve<S>(&self, mut stream: S, dispatcher: Arc<dyn Dispatcher>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut info = UpgradeInfo::default();
        let callback = |request: &UpgradeRequest,
                        response: UpgradeResponse|
         -> std::result::Result<UpgradeResponse, ErrorResponse> {
            info.base_uri = base_uri(request.uri());
            info.tracking_id = tracking_id(request.uri());
            Ok(response)
        };

        let ws_stream = match accept_hdr_async(&mut stream, callback).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                let error = Error::upgrade(e.to_string());
                reject_upgrade(&mut stream, &error).await;
                return Err(error);
            }
        };

        let tracking_id = info.tracking_id.unwrap_or_else(TrackingId::generate);
        let (write, read) = ws_stream.split();
        let (sink, writer) = FrameSink::channel(write);

        let id = ConnectionId::next();
        let cancel = self.registry.add(id, tracking_id.clone(), sink.clone());

        info!(connection = %id, base_uri = %info.base_uri, %tracking_id, "Connected");

        let session = Session {
            id,
            tracking_id,
            base_uri: info.base_uri,
            sink,
            dispatcher,
            cancel,
            continued: FxHashMap::default(),
        };

        let ((), written) = tokio::join!(self.read_loop(read, session), writer);
        written
    }

    /// Reads frames until the connection closes, then cleans up.
    async fn read_loop<R>(&self, mut read: R, mut session: Session)
    where
        R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        let id = session.id;
        let mut heartbeat = self
            .config
            .heartbeat
            .map(|interval| Heartbeat::spawn(interval, session.sink.clone()));
        let mut deadline = heartbeat
            .as_ref()
            .map(|hb| Instant::now() + hb.read_window());
        let mut closing: Option<Instant> = None;
        let mut phase = Phase::Handshaking;

        loop {
            let until = match (deadline, closing) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let read_next = async {
                match until {
                    Some(at) => timeout_at(at, read.next()).await.ok(),
                    None => Some(read.next().await),
                }
            };

            let next = tokio::select! {
                () = session.cancel.notified(), if closing.is_none() => {
                    debug!(connection = %id, "Close requested");
                    closing = Some(Instant::now() + CLOSE_GRACE);
                    continue;
                }
                next = read_next => next,
            };

            let Some(next) = next else {
                if closing.is_some_and(|at| Instant::now() >= at) {
                    debug!(connection = %id, "Close grace period expired");
                } else {
                    warn!(connection = %id, "Heartbeat deadline expired");
                }
                break;
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "Read failed");
                    break;
                }
                None => {
                    debug!(connection = %id, "Stream ended");
                    break;
                }
            };

            let Some(kind) = FrameKind::of(&message) else {
                match message {
                    Message::Close(frame) => {
                        debug!(connection = %id, ?frame, "Close received");
                        break;
                    }
                    Message::Pong(_) => {
                        trace!(connection = %id, "Pong");
                        if let Some(hb) = &heartbeat {
                            deadline = Some(Instant::now() + hb.read_window());
                        }
                    }
                    _ => {}
                }
                continue;
            };
            let data = message.into_data();

            match phase {
                Phase::Handshaking => match self.handshake(&session, &data) {
                    Ok(()) => phase = Phase::Serving,
                    Err(e) => {
                        warn!(connection = %id, error = %e, "Handshake failed");
                        break;
                    }
                },
                Phase::Serving => self.serve_frame(&mut session, kind, &data),
            }
        }

        if let Some(hb) = heartbeat.as_mut() {
            hb.stop();
        }
        self.close(session);
    }

    /// Validates the handshake request and replies.
    fn handshake(&self, session: &Session, data: &[u8]) -> Result<()> {
        let request = HandshakeRequest::parse(data)?;
        let version = &self.config.version;

        if request.version != *version {
            if let Err(e) = session.sink.send_json(&HandshakeResponse::version_mismatch(version)) {
                warn!(connection = %session.id, error = %e, "Failed to write handshake response");
            }
            return Err(Error::version_mismatch(version, request.version));
        }

        let response = HandshakeResponse::accepted(version, session.tracking_id.clone());
        if let Err(e) = session.sink.send_json(&response) {
            warn!(connection = %session.id, error = %e, "Failed to write handshake response");
        }

        debug!(connection = %session.id, %version, "Handshake completed");
        Ok(())
    }

    /// Runs the close cleanup for a finished connection.
    fn close(&self, mut session: Session) {
        for (rid, sender) in session.continued.drain() {
            trace!(connection = %session.id, id = %rid, "Abandoning continuation");
            sender.close();
        }

        let tracking_id = self
            .registry
            .remove(session.id)
            .unwrap_or_else(|| session.tracking_id.clone());
        self.config.mediator.unsubscribe_all(&tracking_id);
        session.sink.close();

        info!(connection = %session.id, %tracking_id, "Disconnected");
    }
}

// ============================================================================
// ProtocolHandler - Frame Dispatch
// ============================================================================

impl ProtocolHandler {
    /// Decodes one serving-phase frame and routes it.
    fn serve_frame(&self, session: &mut Session, kind: FrameKind, data: &[u8]) {
        let frame = match self.config.codec.decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %session.id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        let rid = frame.id().to_string();
        let continued = frame.is_continued();

        if session.continued.contains_key(&rid) {
            Self::feed_continuation(session, rid, frame.body, continued);
            return;
        }

        let writer = ResponseWriter::new(
            rid.as_str(),
            kind,
            session.sink.clone(),
            Arc::clone(&self.config.codec),
        );

        if continued {
            let (sender, body) = Body::streaming();
            debug!(connection = %session.id, id = %rid, "Continuation opened");
            Self::dispatch(session, &frame, body, writer);

            if let Err(e) = sender.send(frame.body) {
                trace!(id = %rid, error = %e, "First fragment not consumed");
            }
            session.continued.insert(rid, sender);
        } else {
            Self::dispatch(session, &frame, Body::full(frame.body.clone()), writer);
        }
    }

    /// Appends a fragment to an open continuation, closing it on the last.
    fn feed_continuation(session: &mut Session, rid: String, body: Vec<u8>, continued: bool) {
        if let Some(sender) = session.continued.get(&rid)
            && let Err(e) = sender.send(body)
        {
            trace!(id = %rid, error = %e, "Fragment not consumed");
        }

        if !continued && let Some(sender) = session.continued.remove(&rid) {
            sender.close();
            debug!(connection = %session.id, id = %rid, "Continuation closed");
        }
    }

    /// Synthesizes the request for `frame` and hands it to the dispatcher.
    fn dispatch(session: &Session, frame: &Frame, body: Body, mut writer: ResponseWriter) {
        let request = match build_request(&session.base_uri, &session.tracking_id, frame, body) {
            Ok(request) => request,
            Err(e) => {
                warn!(connection = %session.id, error = %e, "Rejecting invalid request");
                writer.write_header(StatusCode::BAD_REQUEST);
                return;
            }
        };

        trace!(
            connection = %session.id,
            id = %frame.id(),
            method = %request.method(),
            uri = %request.uri(),
            "Dispatch"
        );

        let dispatcher = Arc::clone(&session.dispatcher);
        tokio::spawn(async move {
            dispatcher.dispatch(request, writer).await;
        });
    }
}

/// Answers a failed upgrade with HTTP 500.
async fn reject_upgrade<S>(stream: &mut S, error: &Error)
where
    S: AsyncWrite + Unpin,
{
    let body = error.to_string();
    let response = format!(
        "HTTP/1.1 500 Internal Server Error\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to write upgrade rejection");
    }
    let _ = stream.shutdown().await;
}

// ============================================================================
// Tests
// ============================================================================
