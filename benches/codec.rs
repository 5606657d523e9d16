//! Frame codec and end-to-end request benchmarks.
//!
//! Benchmarks:
//! - Frame decode and encode at several body sizes
//! - Request round trips over a localhost connection
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use wsmux::http::{Request, StatusCode};
use wsmux::protocol::Headers;
use wsmux::{
    Body, ClientRequest, ClientTransport, Codec, DefaultCodec, ProtocolHandler, Reply, Responder,
    ResponseWriter, Server, ServerConfig,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BODY_SIZES: &[usize] = &[0, 256, 4096, 65536];
const CONCURRENT_REQUESTS: &[usize] = &[1, 16, 128];

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn request_headers() -> Headers {
    match json!({
        "id": "42",
        "method": "POST",
        "path": "/samples/chat?room=general",
        "type": "application/octet-stream",
        "accept": "application/json",
    }) {
        Value::Object(map) => map,
        _ => Headers::new(),
    }
}

fn bench_codec(c: &mut Criterion) {
    let codec = DefaultCodec::new();
    let headers = request_headers();

    let mut group = c.benchmark_group("codec");

    for &size in BODY_SIZES {
        let body = vec![b'x'; size];
        let frame = codec.encode(&headers, &body).expect("encode");
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &body, |b, body| {
            b.iter(|| codec.encode(&headers, body).expect("encode"));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| codec.decode(frame).expect("decode"));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let (server, client) = rt.block_on(async {
        let dispatcher = |_request: Request<Body>, mut response: ResponseWriter| async move {
            let _ = Reply::text(StatusCode::OK, "pong").write_response(&mut response);
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let handler = ProtocolHandler::new(ServerConfig::default());
        let server = Server::bind(addr, handler, Arc::new(dispatcher))
            .await
            .expect("bind");
        let client = ClientTransport::builder(server.ws_url())
            .connect()
            .await
            .expect("connect");
        (server, client)
    });

    let mut group = c.benchmark_group("round_trip");

    for &count in CONCURRENT_REQUESTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("submit", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let request = ClientRequest::get("/ping");
                let submits = (0..count).map(|_| client.submit(&request));
                futures_util::future::try_join_all(submits)
                    .await
                    .expect("replies")
            });
        });
    }

    group.finish();

    client.close();
    rt.block_on(server.shutdown());
}

criterion_group!(benches, bench_codec, bench_round_trip);
criterion_main!(benches);
