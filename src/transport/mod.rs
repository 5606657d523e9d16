//! WebSocket transport layer (server side).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   TCP    ┌─────────────────────────────────────────┐
//! │  Client  │─────────►│ Server (accept loop)                    │
//! └──────────┘          │   └─► ProtocolHandler::serve            │
//! ▲                     │         read loop ──► Dispatcher (task) │
//! │                     │         FrameSink ◄── ResponseWriter    │
//! └─────────────────────┤         FrameSink ◄── ResponseMediator  │
//!         frames        │         FrameSink ◄── Heartbeat         │
//!                       └─────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | Upgrade, handshake, read loop, dispatch |
//! | `heartbeat` | Ping ticker |
//! | `registry` | Live connections by id |
//! | `response` | Synthetic response writer |
//! | `server` | TCP accept loop |
//! | `sink` | Serialized per-connection writer |

// ============================================================================
// Submodules
// ============================================================================

/// Protocol handler and connection read loop.
pub mod handler;

/// Server-initiated ping ticker.
pub mod heartbeat;

/// Live connection registry.
pub mod registry;

/// Synthetic response writer.
pub mod response;

/// TCP accept loop.
pub mod server;

/// Serialized frame writer.
pub mod sink;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{Dispatcher, ProtocolHandler, ServerConfig, ServerConfigBuilder};
pub use heartbeat::Heartbeat;
pub use registry::ConnectionRegistry;
pub use response::ResponseWriter;
pub use server::Server;
pub use sink::{FrameKind, FrameSink};
