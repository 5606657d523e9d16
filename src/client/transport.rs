//! Client transport: submit requests and receive replies over one socket.
//!
//! # Event Loop
//!
//! After the handshake a reader task decodes every inbound frame and routes
//! it by `id`:
//!
//! - a pending future is fulfilled and removed
//! - a one-shot callback is invoked and removed
//! - a sticky callback (subscription) is invoked and kept
//! - an unknown id (e.g. a timed-out request) is dropped
//!
//! Outbound frames go through a [`FrameSink`] writer task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::TrackingId;
use crate::protocol::{Codec, DefaultCodec, HandshakeRequest, HandshakeResponse, PROTOCOL_VERSION};
use crate::transport::{FrameKind, FrameSink};

use super::pending::{Callback, Delivery, Pending, PendingTable};
use super::request::ClientRequest;
use super::response::{ClientResponse, Consumer, Consumers, Payload};

// ============================================================================
// Constants
// ============================================================================

/// Default time `submit` waits for a reply.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time `connect` waits for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameter used to propose a tracking id.
const TRACKING_ID_PARAM: &str = "x-tracking-id";

// ============================================================================
// SubmitMode
// ============================================================================

/// How `submit_async` tracks its callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Invoked once, then forgotten.
    #[default]
    None,
    /// Invoked for every reply until cancelled (a subscription).
    Subscribe,
    /// Like `None`, but first drops the local entry of subscription `sid`.
    Unsubscribe(String),
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Client configuration and connect builder.
///
/// # Example
///
/// ```ignore
/// let client = ClientTransport::builder("ws://127.0.0.1:8091/samples/chat")
///     .submit_timeout(Duration::from_secs(2))
///     .connect()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    url: String,
    submit_timeout: Duration,
    handshake_timeout: Duration,
    tracking_id: Option<TrackingId>,
    codec: Arc<dyn Codec>,
    consumers: Consumers,
    version: String,
}

impl ClientConfig {
    /// Creates a configuration for `url` with defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            tracking_id: None,
            codec: Arc::new(DefaultCodec),
            consumers: Consumers::new(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Sets how long `submit` waits for a reply.
    #[must_use]
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Sets how long `connect` waits for the handshake reply.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Proposes a tracking id, e.g. to resume after a reconnect.
    #[must_use]
    pub fn tracking_id(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = Some(TrackingId::new(tracking_id));
        self
    }

    /// Sets the frame codec.
    #[must_use]
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Registers a body consumer for `media_type`.
    #[must_use]
    pub fn consumer<F>(mut self, media_type: &str, consumer: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Payload> + Send + Sync + 'static,
    {
        let consumer: Consumer = Arc::new(consumer);
        self.consumers.register(media_type, consumer);
        self
    }

    /// Overrides the protocol version sent in the handshake.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Returns the endpoint URL including the tracking id parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the URL does not parse.
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        if let Some(tracking_id) = &self.tracking_id {
            url.query_pairs_mut()
                .append_pair(TRACKING_ID_PARAM, tracking_id.as_str());
        }
        Ok(url)
    }

    /// Connects and completes the handshake.
    ///
    /// # Errors
    ///
    /// See [`ClientTransport::connect`].
    pub async fn connect(self) -> Result<ClientTransport> {
        ClientTransport::connect(self).await
    }
}

// ============================================================================
// ClientTransport
// ============================================================================

/// Connected client.
///
/// Cheap to clone; clones share the socket and pending table.
#[derive(Debug, Clone)]
pub struct ClientTransport {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    sink: FrameSink,
    pending: PendingTable,
    next_id: AtomicU64,
    tracking_id: TrackingId,
    codec: Arc<dyn Codec>,
    consumers: Consumers,
    submit_timeout: Duration,
}

// ============================================================================
// ClientTransport - Connect
// ============================================================================

impl ClientTransport {
    /// Starts configuring a client for `url`.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> ClientConfig {
        ClientConfig::new(url)
    }

    /// Opens the socket and performs the handshake.
    ///
    /// No request can be submitted before the server has accepted the
    /// handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL is invalid
    /// - [`Error::WebSocket`] if the socket cannot be opened
    /// - [`Error::HandshakeVersionMismatch`] if the server rejects the version
    /// - [`Error::HandshakeMalformed`] if the reply is not a handshake
    /// - [`Error::Connection`] if no reply arrives in time
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let url = config.endpoint()?;
        debug!(%url, "Connecting");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, mut read) = ws_stream.split();
        let (sink, _writer) = FrameSink::spawn(write);

        sink.send_json(&HandshakeRequest::new(config.version.as_str()))?;

        let tracking_id = match timeout(
            config.handshake_timeout,
            read_handshake(&mut read, &config.version),
        )
        .await
        {
            Ok(Ok(tracking_id)) => tracking_id,
            Ok(Err(e)) => {
                sink.close();
                return Err(e);
            }
            Err(_) => {
                sink.close();
                return Err(Error::connection(format!(
                    "no handshake reply within {}ms",
                    config.handshake_timeout.as_millis()
                )));
            }
        };

        info!(%url, %tracking_id, "Connected");

        let inner = Arc::new(ClientInner {
            sink,
            pending: PendingTable::new(),
            next_id: AtomicU64::new(0),
            tracking_id,
            codec: config.codec,
            consumers: config.consumers,
            submit_timeout: config.submit_timeout,
        });

        tokio::spawn(run_reader(read, Arc::clone(&inner)));

        Ok(Self { inner })
    }
}

/// Waits for the handshake reply, skipping control frames.
async fn read_handshake<R>(read: &mut R, version: &str) -> Result<TrackingId>
where
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                return HandshakeResponse::validate(text.as_bytes(), version);
            }
            Some(Ok(Message::Binary(data))) => {
                return HandshakeResponse::validate(&data, version);
            }
            Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

// ============================================================================
// ClientTransport - Public API
// ============================================================================

impl ClientTransport {
    /// Returns the tracking id assigned by the server.
    #[inline]
    #[must_use]
    pub fn tracking_id(&self) -> &TrackingId {
        &self.inner.tracking_id
    }

    /// Returns the number of requests awaiting replies.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Sends `request` and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no reply arrives within the submit timeout
    /// - [`Error::UnknownContentType`] if no consumer handles the reply's type
    /// - [`Error::ConnectionClosed`] if the connection is gone
    pub async fn submit(&self, request: &ClientRequest) -> Result<ClientResponse> {
        let id = self.next_id();
        let frames = request.encode(&id, self.inner.codec.as_ref())?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), Pending::Future(tx));

        if let Err(e) = self.send_frames(frames) {
            self.inner.pending.remove(&id);
            return Err(e);
        }
        trace!(%id, method = %request.method(), "Submitted");

        let submit_timeout = self.inner.submit_timeout;
        match timeout(submit_timeout, rx).await {
            Ok(Ok(frame)) => self.inner.consumers.response(frame),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.inner.pending.remove(&id);
                warn!(%id, "Request timed out");
                Err(Error::request_timeout(id, submit_timeout.as_millis() as u64))
            }
        }
    }

    /// Sends `request` and invokes `callback` for its reply (or replies).
    ///
    /// Returns the request id, which identifies a subscription for a later
    /// [`SubmitMode::Unsubscribe`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be encoded or sent.
    pub fn submit_async<F>(
        &self,
        request: &ClientRequest,
        callback: F,
        mode: SubmitMode,
    ) -> Result<String>
    where
        F: Fn(&str, Result<ClientResponse>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let frames = request.encode(&id, self.inner.codec.as_ref())?;

        if let SubmitMode::Unsubscribe(sid) = &mode
            && self.inner.pending.remove(sid)
        {
            debug!(%sid, "Dropped local subscription");
        }

        let callback: Callback = Arc::new(callback);
        let sticky = mode == SubmitMode::Subscribe;
        self.inner
            .pending
            .insert(id.clone(), Pending::Callback { callback, sticky });

        if let Err(e) = self.send_frames(frames) {
            self.inner.pending.remove(&id);
            return Err(e);
        }
        trace!(%id, method = %request.method(), ?mode, "Submitted async");

        Ok(id)
    }

    /// Closes the socket.
    ///
    /// Outstanding `submit` calls are not failed; they run into their
    /// timeout.
    pub fn close(&self) {
        debug!(tracking_id = %self.inner.tracking_id, "Closing client");
        self.inner.sink.close();
    }

    fn next_id(&self) -> String {
        (self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn send_frames(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        frames
            .into_iter()
            .try_for_each(|frame| self.inner.sink.send_frame(FrameKind::Text, frame))
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Routes inbound frames to pending entries until the socket closes.
async fn run_reader<R>(mut read: R, inner: Arc<ClientInner>)
where
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        let data = match message {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Close received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Read failed");
                break;
            }
        };

        let frame = match inner.codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable reply");
                continue;
            }
        };

        let id = frame.id().to_string();
        match inner.pending.take(&id, false) {
            Some(Delivery::Future(tx)) => {
                if tx.send(frame).is_err() {
                    trace!(%id, "Reply for abandoned request");
                }
            }
            Some(Delivery::Callback(callback)) => {
                callback(&id, inner.consumers.response(frame));
            }
            None => trace!(%id, "Reply without pending request"),
        }
    }

    debug!(tracking_id = %inner.tracking_id, "Reader terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
    use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, StatusCode};

    use crate::mediator::{Reply, Responder, ResponseMediator};
    use crate::protocol::{Body, request_key};
    use crate::transport::{Dispatcher, ProtocolHandler, ResponseWriter, Server, ServerConfig};

    /// Small application: echo, silence, xml, subscribe, unsubscribe.
    struct App {
        mediator: ResponseMediator,
    }

    #[async_trait]
    impl Dispatcher for App {
        async fn dispatch(&self, request: Request<Body>, mut response: ResponseWriter) {
            let path = request.uri().path().to_string();
            let key = request_key(&request);

            if path.ends_with("/echo") {
                let chunked = request.headers().contains_key("transfer-encoding");
                let query = request.uri().query().unwrap_or_default().to_string();
                let body = request.into_body().collect().await;
                let reply = json!({
                    "path": path,
                    "query": query,
                    "chunked": chunked,
                    "body": String::from_utf8_lossy(&body),
                });
                let _ = Reply::json(StatusCode::OK, &reply)
                    .and_then(|reply| reply.write_response(&mut response));
            } else if path.ends_with("/xml") {
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
                response.write_header(StatusCode::OK);
                let _ = response.write(b"<a/>");
            } else if path.ends_with("/subscribe") {
                let Some(key) = key else { return };
                let responder = self.mediator.subscribe(
                    key,
                    "client",
                    Reply::text(StatusCode::OK, "subscribed"),
                    None,
                    None,
                );
                let _ = responder.write_response(&mut response);
            } else if let Some((_, sid)) = path.split_once("/unsubscribe/") {
                let Some(key) = key else { return };
                self.mediator.unsubscribe(&key, sid);
                response.write_header(StatusCode::OK);
            }
            // anything else ("/silent") never replies
        }
    }

    async fn start(config: ServerConfig) -> (Server, ResponseMediator) {
        let mediator = config.mediator.clone();
        let app = App {
            mediator: mediator.clone(),
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let server = Server::bind(addr, ProtocolHandler::new(config), Arc::new(app))
            .await
            .expect("bind");
        (server, mediator)
    }

    fn url(server: &Server) -> String {
        format!("{}/api", server.ws_url())
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely push")
            .expect("open channel")
    }

    #[tokio::test]
    async fn test_connect_assigns_tracking_id() {
        let (server, _) = start(ServerConfig::default()).await;

        let client = ClientTransport::builder(url(&server)).connect().await.expect("connect");
        assert_eq!(client.tracking_id().as_str().len(), 36);

        let resumed = ClientTransport::builder(url(&server))
            .tracking_id("mine")
            .connect()
            .await
            .expect("connect");
        assert_eq!(resumed.tracking_id().as_str(), "mine");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_version_mismatch() {
        let config = ServerConfig::builder().version("3.0").build().expect("config");
        let (server, _) = start(config).await;

        let result = ClientTransport::builder(url(&server)).connect().await;
        let err = result.expect_err("mismatch");
        assert!(err.is_handshake_error());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_echo() {
        let (server, _) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server)).connect().await.expect("connect");

        let request = ClientRequest::post("/{op}")
            .path_param("op", "echo")
            .query("lang", "es")
            .text("hola");
        let response = client.submit(&request).await.expect("reply");

        assert_eq!(response.code, 200);
        assert_eq!(response.id, "1");
        let body = response.payload.as_json().expect("json");
        assert_eq!(body["path"], "/api/echo");
        assert_eq!(body["query"], "lang=es");
        assert_eq!(body["chunked"], false);
        assert_eq!(body["body"], "hola");
        assert_eq!(client.pending_count(), 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_fragmented() {
        let (server, _) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server)).connect().await.expect("connect");

        let request = ClientRequest::post("/echo")
            .text("a fairly long body split into pieces")
            .fragment_size(4);
        let response = client.submit(&request).await.expect("reply");

        let body = response.payload.as_json().expect("json");
        assert_eq!(body["chunked"], true);
        assert_eq!(body["body"], "a fairly long body split into pieces");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_timeout() {
        let (server, _) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server))
            .submit_timeout(Duration::from_millis(100))
            .connect()
            .await
            .expect("connect");

        let err = client
            .submit(&ClientRequest::get("/silent"))
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
        assert_eq!(client.pending_count(), 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_unknown_content_type() {
        let (server, _) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server)).connect().await.expect("connect");

        let err = client
            .submit(&ClientRequest::get("/xml"))
            .await
            .expect_err("no consumer");
        assert!(matches!(err, Error::UnknownContentType { .. }));

        let client = ClientTransport::builder(url(&server))
            .consumer("application/xml", |body: &[u8]| -> Result<Payload> {
                Ok(Payload::Text(String::from_utf8_lossy(body).into_owned()))
            })
            .connect()
            .await
            .expect("connect");
        let response = client.submit(&ClientRequest::get("/xml")).await.expect("xml");
        assert_eq!(response.payload.as_text(), Some("<a/>"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_is_sticky_until_unsubscribed() {
        let (server, mediator) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server)).connect().await.expect("connect");

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let sid = client
            .submit_async(
                &ClientRequest::get("/subscribe"),
                move |_, reply| {
                    if let Ok(reply) = reply
                        && let Some(text) = reply.payload.as_text()
                    {
                        let _ = tx.send(text.to_string());
                    }
                },
                SubmitMode::Subscribe,
            )
            .expect("subscribe");

        assert_eq!(next(&mut rx).await, "subscribed");
        assert_eq!(mediator.write("client", b"one").expect("write"), 1);
        assert_eq!(next(&mut rx).await, "one");
        assert_eq!(mediator.write("*", b"two").expect("write"), 1);
        assert_eq!(next(&mut rx).await, "two");
        assert_eq!(client.pending_count(), 1);

        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = parking_lot::Mutex::new(Some(done_tx));
        client
            .submit_async(
                &ClientRequest::delete("/unsubscribe/{sid}").path_param("sid", sid.as_str()),
                move |_, reply| {
                    if let Some(tx) = done_tx.lock().take() {
                        let _ = tx.send(reply.map(|r| r.code));
                    }
                },
                SubmitMode::Unsubscribe(sid.clone()),
            )
            .expect("unsubscribe");

        let code = timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("timely")
            .expect("sent")
            .expect("reply");
        assert_eq!(code, 200);
        assert_eq!(client.pending_count(), 0);
        assert!(mediator.is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_topic_hello_and_bye_across_clients() {
        let mediator = ResponseMediator::new();
        let dispatcher = {
            let mediator = mediator.clone();
            move |request: Request<Body>, mut response: ResponseWriter| {
                let mediator = mediator.clone();
                async move {
                    let name = request.uri().query().unwrap_or_default().to_string();
                    let Some(key) = request_key(&request) else { return };
                    let responder = mediator.subscribe_topic(
                        key,
                        "room",
                        name.as_str(),
                        Reply::status(StatusCode::OK),
                        Some(format!("{name}+").into_bytes()),
                        Some(format!("{name}-").into_bytes()),
                    );
                    let _ = responder.write_response(&mut response);
                }
            }
        };
        let config = ServerConfig::builder().mediator(mediator.clone()).build().expect("config");
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let server = Server::bind(addr, ProtocolHandler::new(config), Arc::new(dispatcher))
            .await
            .expect("bind");

        let join = |name: &'static str| {
            let url = url(&server);
            async move {
                let client = ClientTransport::builder(url).connect().await.expect("connect");
                let (tx, rx) = mpsc::unbounded_channel::<String>();
                client
                    .submit_async(
                        &ClientRequest::get("/room").query("n", name),
                        move |_, reply| {
                            if let Ok(reply) = reply
                                && let Payload::Bytes(bytes) = reply.payload
                            {
                                let _ = tx.send(String::from_utf8_lossy(&bytes).into_owned());
                            }
                        },
                        SubmitMode::Subscribe,
                    )
                    .expect("subscribe");
                (client, rx)
            }
        };

        let (ana, mut ana_rx) = join("ana").await;
        assert_eq!(next(&mut ana_rx).await, "n=ana+");

        let (bob, mut bob_rx) = join("bob").await;
        assert_eq!(next(&mut ana_rx).await, "n=bob+");
        assert_eq!(next(&mut bob_rx).await, "n=bob+");

        bob.close();
        assert_eq!(next(&mut ana_rx).await, "n=bob-");
        assert_eq!(mediator.subscribed_topic("room").len(), 1);

        ana.close();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_leaves_pending_to_time_out() {
        let (server, _) = start(ServerConfig::default()).await;
        let client = ClientTransport::builder(url(&server))
            .submit_timeout(Duration::from_millis(200))
            .connect()
            .await
            .expect("connect");

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.submit(&ClientRequest::get("/silent")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close();

        let result = pending.await.expect("join");
        assert!(result.is_err());

        server.shutdown().await;
    }

    #[test]
    fn test_endpoint_with_tracking_id() {
        let config = ClientConfig::new("ws://localhost:8091/api?x=1").tracking_id("abc");
        assert_eq!(
            config.endpoint().expect("url").as_str(),
            "ws://localhost:8091/api?x=1&x-tracking-id=abc"
        );
        assert!(ClientConfig::new("not a url").endpoint().is_err());
    }
}
