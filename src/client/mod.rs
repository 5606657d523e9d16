//! Client side of the multiplexing protocol.
//!
//! # Usage
//!
//! ```ignore
//! let client = ClientTransport::builder("ws://127.0.0.1:8091/api").connect().await?;
//!
//! // Request/response
//! let reply = client.submit(&ClientRequest::get("/ping")).await?;
//!
//! // Subscription: the callback runs for every pushed frame
//! let sid = client.submit_async(&ClientRequest::get("/chat"), on_message, SubmitMode::Subscribe)?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Request builder and frame encoding |
//! | `response` | Replies and content consumers |
//! | `pending` | Outstanding request table |
//! | `transport` | Connection, handshake and reader task |

// ============================================================================
// Submodules
// ============================================================================

/// Outstanding requests.
mod pending;

/// Request builder.
pub mod request;

/// Replies and content consumers.
pub mod response;

/// Connection and submit API.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use pending::Callback;
pub use request::ClientRequest;
pub use response::{BYTES_MIME, ClientResponse, Consumer, Consumers, JSON_MIME, Payload, TEXT_MIME};
pub use transport::{ClientConfig, ClientTransport, SubmitMode};
