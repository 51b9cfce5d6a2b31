//! HTTP/1.1 front end tests over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;

use flawless::prelude::*;
use http::{Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Running = (SocketAddr, oneshot::Sender<()>, JoinHandle<std::io::Result<()>>);

async fn start(dispatcher: Dispatcher) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, Arc::new(dispatcher), async move {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx, server)
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

/// Reads exactly one response off a keep-alive connection.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 256];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-response");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(buf.len(), header_end + content_length);
    String::from_utf8(buf).unwrap()
}

fn echo_body() -> impl Handler {
    handler_fn(|ctx| {
        let body = ctx.body().clone();
        let id = ctx.param("id").unwrap_or_default().to_string();
        Box::pin(async move {
            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "id": id, "len": body.len() }),
            ))
        })
    })
}

#[tokio::test]
async fn test_serves_matched_route() {
    let dispatcher = Dispatcher::builder()
        .route(Method::POST, "/users/{id}", echo_body())
        .unwrap()
        .build();
    let (addr, stop, server) = start(dispatcher).await;

    let response = send(
        addr,
        "POST /users/7 HTTP/1.1\r\nhost: localhost\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""id":"7""#), "{response}");
    assert!(response.contains(r#""len":5"#), "{response}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (addr, stop, server) = start(Dispatcher::builder().build()).await;

    let response = send(addr, "GET /nope HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    assert!(response.contains("NOT_FOUND"), "{response}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_per_ip_limit_uses_peer_address() {
    let dispatcher = Dispatcher::builder()
        .middleware(RateLimitMiddleware::builder().capacity(1).window_secs(3600).per_ip().build())
        .route(Method::GET, "/", handler_fn(|_ctx| Box::pin(async { Ok(empty_response(StatusCode::OK)) })))
        .unwrap()
        .build();
    let (addr, stop, server) = start(dispatcher).await;

    let raw = "GET / HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n";
    assert!(send(addr, raw).await.starts_with("HTTP/1.1 200"));
    assert!(send(addr, raw).await.starts_with("HTTP/1.1 429"));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keepalive_serves_sequential_requests() {
    let dispatcher = Dispatcher::builder()
        .route(Method::POST, "/users/{id}", echo_body())
        .unwrap()
        .build();
    let (addr, stop, server) = start(dispatcher).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for id in ["1", "22"] {
        let raw = format!("POST /users/{id} HTTP/1.1\r\nhost: localhost\r\ncontent-length: 3\r\n\r\nabc");
        stream.write_all(raw.as_bytes()).await.unwrap();
        let response = read_response(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(&format!(r#"{{"id":"{id}","len":3}}"#)), "{response}");
    }

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_with_idle_keepalive_connection() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/", handler_fn(|_ctx| Box::pin(async { Ok(empty_response(StatusCode::OK)) })))
        .unwrap()
        .build();
    let (addr, stop, server) = start(dispatcher).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    let head = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
