//! TCP accept loop in front of a [`ProtocolHandler`].
//!
//! # Connection Flow
//!
//! 1. `Server::bind` binds a TCP listener (port 0 picks a free port)
//! 2. The accept loop spawns one task per TCP stream
//! 3. Each task runs [`ProtocolHandler::serve`] until the socket closes
//!
//! Plain HTTP requests are not served; a request that is not a WebSocket
//! upgrade gets HTTP 500.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::Result;

use super::handler::{Dispatcher, ProtocolHandler};

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Server
// ============================================================================

/// Listening server.
///
/// # Example
///
/// ```ignore
/// let handler = ProtocolHandler::new(ServerConfig::default());
/// let server = Server::bind("127.0.0.1:0".parse()?, handler, Arc::new(dispatch)).await?;
/// println!("listening on {}", server.ws_url());
/// ```
#[derive(Debug)]
pub struct Server {
    /// Bound address.
    local_addr: SocketAddr,
    /// Handler shared by all connections.
    handler: ProtocolHandler,
    /// Accept loop stop flag.
    shutdown: Arc<AtomicBool>,
    /// Accept loop task.
    accept_task: JoinHandle<()>,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Binds `addr` and starts accepting connections.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to bind (port 0 for a random port)
    /// * `handler` - Protocol handler serving each connection
    /// * `dispatcher` - Application request handler
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if binding fails.
    pub async fn bind(
        addr: SocketAddr,
        handler: ProtocolHandler,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            handler.clone(),
            dispatcher,
            Arc::clone(&shutdown),
        ));

        info!(%local_addr, "Server started");

        Ok(Self {
            local_addr,
            handler,
            shutdown,
            accept_task,
        })
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL of this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the protocol handler.
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &ProtocolHandler {
        &self.handler
    }

    /// Stops accepting and closes every live connection.
    pub async fn shutdown(self) {
        info!(port = self.port(), "Server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept loop panicked");
        }
        self.handler.shutdown();

        info!("Server shutdown complete");
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

async fn accept_loop(
    listener: TcpListener,
    handler: ProtocolHandler,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Accept loop started");

    while !shutdown.load(Ordering::SeqCst) {
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&dispatcher),
                ));
            }
            Ok(Err(e)) => error!(error = %e, "Accept failed"),
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: ProtocolHandler,
    dispatcher: Arc<dyn Dispatcher>,
) {
    debug!(?addr, "TCP connection accepted");

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    if let Err(e) = handler.serve(stream, dispatcher).await {
        warn!(error = %e, ?addr, "Connection handling failed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::http::Request;

    use crate::protocol::Body;
    use crate::transport::{ResponseWriter, ServerConfig};

    async fn noop(_request: Request<Body>, _response: ResponseWriter) {}

    async fn bind() -> Server {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        Server::bind(addr, ProtocolHandler::new(ServerConfig::default()), Arc::new(noop))
            .await
            .expect("bind should succeed")
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = bind().await;

        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(server.handler().connection_count(), 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_plain_http_gets_500() {
        let server = bind().await;

        let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
        stream
            .write_all(b"GET /api HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .expect("write");

        let mut response = String::new();
        timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
            .await
            .expect("timely response")
            .expect("read");
        assert!(response.starts_with("HTTP/1.1 500"), "got {response}");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = bind().await;
        let addr = server.local_addr();
        server.shutdown().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
