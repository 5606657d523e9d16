//! wsmux - HTTP-style requests and subscriptions multiplexed over one WebSocket.
//!
//! A client opens a single WebSocket, agrees on a protocol version, then
//! sends many concurrent requests as frames tagged with a request id. The
//! server turns each frame into an ordinary [`http::Request`] for the
//! application and writes replies back tagged with the same id. Requests
//! may also become long-lived subscriptions that receive pushed frames.
//!
//! # Architecture
//!
//! ```text
//!  ClientTransport                         Server / ProtocolHandler
//!  ───────────────                         ────────────────────────
//!  submit ──► {"id":"1","method":"GET",..} ──► read loop ──► Dispatcher
//!                                                              │
//!  pending[1] ◄── {"id":"1","code":200,..} ◄── ResponseWriter ◄┘
//!                                                    ▲
//!  callback ◄──── pushed frames ◄──────────── ResponseMediator
//! ```
//!
//! Key design principles:
//!
//! - One writer task per connection serializes all outbound frames
//! - Subscriptions are keyed by `trackingId#requestId`
//! - A disconnect removes every subscription of that tracking id
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use wsmux::http::{Request, StatusCode};
//! use wsmux::{Body, ClientRequest, ClientTransport, ProtocolHandler, Reply, Responder};
//! use wsmux::{ResponseWriter, Result, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = |_request: Request<Body>, mut response: ResponseWriter| async move {
//!         let _ = Reply::text(StatusCode::OK, "pong").write_response(&mut response);
//!     };
//!
//!     let handler = ProtocolHandler::new(ServerConfig::default());
//!     let addr = SocketAddr::from(([127, 0, 0, 1], 0));
//!     let server = Server::bind(addr, handler, Arc::new(dispatcher)).await?;
//!
//!     let client = ClientTransport::builder(server.ws_url()).connect().await?;
//!     let reply = client.submit(&ClientRequest::get("/ping")).await?;
//!     assert_eq!(reply.payload.as_text(), Some("pong"));
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Client transport, requests and replies |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Tracking ids and request keys |
//! | [`mediator`] | Subscriptions, topics and broadcasts |
//! | [`protocol`] | Frame codec, handshake, request synthesis |
//! | [`transport`] | Server, protocol handler and connection plumbing |

// ============================================================================
// Modules
// ============================================================================

/// Client transport.
///
/// Use [`ClientTransport::builder()`] to connect.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Connection-scoped identifiers.
pub mod identifiers;

/// Subscription registry and push fan-out.
pub mod mediator;

/// Wire protocol: frames, handshake and synthetic requests.
pub mod protocol;

/// Server side: accept loop, handler, heartbeat and writers.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

/// HTTP types used by dispatchers.
pub use tokio_tungstenite::tungstenite::http;

// Client types
pub use client::{
    Callback, ClientConfig, ClientRequest, ClientResponse, ClientTransport, Consumer, Consumers,
    Payload, SubmitMode,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestKey, TrackingId};

// Mediator types
pub use mediator::{Reply, Responder, ResponseMediator, ReusableResponder, SubscriptionScope};

// Protocol types
pub use protocol::{Body, Codec, DefaultCodec, Frame, HandshakeRequest, HandshakeResponse};

// Transport types
pub use transport::{
    Dispatcher, ProtocolHandler, ResponseWriter, Server, ServerConfig, ServerConfigBuilder,
};
