//! Wire protocol: frames, handshake and request synthesis.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `HandshakeRequest` | Client → Server | Announce protocol version |
//! | `HandshakeResponse` | Server → Client | Accept (tracking id) or reject |
//! | Request frame | Client → Server | `{id, method, path, type?, accept?, headers?, continue?}` + body |
//! | Response frame | Server → Client | `{id, code, type?}` + body |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Frame encoding and decoding |
//! | `handshake` | Version handshake messages |
//! | `request` | Synthetic HTTP requests and upgrade helpers |

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::http::HeaderName;

// ============================================================================
// Submodules
// ============================================================================

/// Frame codec.
pub mod codec;

/// Version handshake messages.
pub mod handshake;

/// Synthetic HTTP requests built from frames.
pub mod request;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Correlation id header (requests and responses).
pub const HEADER_ID: &str = "id";
/// Request method header.
pub const HEADER_METHOD: &str = "method";
/// Request path header.
pub const HEADER_PATH: &str = "path";
/// Content type header.
pub const HEADER_TYPE: &str = "type";
/// Accept header.
pub const HEADER_ACCEPT: &str = "accept";
/// Nested extra HTTP headers.
pub const HEADER_EXTRA: &str = "headers";
/// Fragment marker.
pub const HEADER_CONTINUE: &str = "continue";
/// Response status code header.
pub const HEADER_CODE: &str = "code";

/// HTTP header carrying `trackingID#requestID` on synthesized requests.
pub const HEADER_REQUEST_KEY: HeaderName = HeaderName::from_static("x-request-key");

/// Upgrade query parameters that carry a client-supplied tracking id.
pub const TRACKING_ID_PARAMS: &[&str] = &["x-tracking-id", "X-Atmosphere-tracking-id"];

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Codec, DefaultCodec, Frame, Headers};
pub use handshake::{HandshakeRequest, HandshakeResponse, VERSION_MISMATCH};
pub use request::{
    Body, BodySender, base_uri, build_request, is_websocket_upgrade_requested, request_key,
    tracking_id,
};
