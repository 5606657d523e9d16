//! Topic chat over a single multiplexed WebSocket per client.
//!
//! Demonstrates:
//! - Serving a dispatcher with `Server::bind`
//! - Topic subscriptions with hello/bye broadcasts
//! - Publishing with plain `submit` while a subscription stays open
//!
//! Usage:
//!   cargo run --example chat
//!   cargo run --example chat -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use wsmux::http::{Request, StatusCode};
use wsmux::protocol::request_key;
use wsmux::{
    Body, ClientRequest, ClientTransport, Dispatcher, ProtocolHandler, Reply, Responder,
    ResponseMediator, ResponseWriter, Server, ServerConfig, SubmitMode,
};

// ============================================================================
// Constants
// ============================================================================

const ADDR: &str = "127.0.0.1:8091";
const ROOM: &str = "general";

// ============================================================================
// Chat Dispatcher
// ============================================================================

/// `GET /chat/{room}?name=..` joins, `POST /chat/{room}` publishes.
struct Chat {
    mediator: ResponseMediator,
}

#[async_trait]
impl Dispatcher for Chat {
    async fn dispatch(&self, request: Request<Body>, mut response: ResponseWriter) {
        let Some(room) = request.uri().path().strip_prefix("/chat/").map(str::to_string) else {
            response.write_header(StatusCode::NOT_FOUND);
            return;
        };
        let name = request
            .uri()
            .query()
            .and_then(|q| q.strip_prefix("name="))
            .unwrap_or("anonymous")
            .to_string();

        match request.method().as_str() {
            "GET" => {
                let Some(key) = request_key(&request) else {
                    response.write_header(StatusCode::BAD_REQUEST);
                    return;
                };
                let responder = self.mediator.subscribe_topic(
                    key,
                    room.as_str(),
                    name.as_str(),
                    Reply::text(StatusCode::OK, format!("welcome to {room}")),
                    Some(format!("{name} joined").into_bytes()),
                    Some(format!("{name} left").into_bytes()),
                );
                if let Err(e) = responder.write_response(&mut response) {
                    tracing::warn!(error = %e, "Join failed");
                }
            }
            "POST" => {
                let body = request.into_body().collect().await;
                let delivered = self.mediator.write_topic(&room, &body).unwrap_or_default();
                let _ = Reply::text(StatusCode::OK, delivered.to_string())
                    .write_response(&mut response);
            }
            _ => response.write_header(StatusCode::METHOD_NOT_ALLOWED),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    let config = ServerConfig::builder()
        .heartbeat(Duration::from_secs(30))
        .build()?;
    let chat = Chat {
        mediator: config.mediator.clone(),
    };
    let addr: SocketAddr = ADDR.parse()?;
    let server = Server::bind(addr, ProtocolHandler::new(config), Arc::new(chat)).await?;
    println!("[Server] Listening on {}", server.ws_url());

    let ana = join(&server, "ana").await?;
    let bob = join(&server, "bob").await?;

    let reply = ana
        .submit(&ClientRequest::post("/chat/{room}").path_param("room", ROOM).text("hola bob"))
        .await?;
    println!("[ana] Delivered to {:?} subscribers", reply.payload.as_text());

    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.close();
    tokio::time::sleep(Duration::from_millis(100)).await;

    ana.close();
    server.shutdown().await;
    Ok(())
}

async fn join(server: &Server, name: &'static str) -> anyhow::Result<ClientTransport> {
    let client = ClientTransport::builder(server.ws_url()).connect().await?;
    client.submit_async(
        &ClientRequest::get("/chat/{room}")
            .path_param("room", ROOM)
            .query("name", name),
        move |_, reply| match reply {
            Ok(reply) => println!("[{name}] {}", reply.payload.as_text().unwrap_or_default()),
            Err(e) => println!("[{name}] error: {e}"),
        },
        SubmitMode::Subscribe,
    )?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(client)
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug { "wsmux=debug" } else { "wsmux=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
