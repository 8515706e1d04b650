//! Integration tests for the listener.
//!
//! Each test starts its own server on an ephemeral port of 127.0.0.1 and talks
//! to it over real sockets, with reqwest for well-formed traffic and raw TCP
//! for transport-level cases.
//!
//! Run with: cargo test --test server_tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use upstream::{BindError, RunningServer, ServeError, Server, ServerConfig, ServerState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config() -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        workers: 4,
        grace_period: Duration::from_secs(5),
    }
}

/// Start a server and serve it in the background.
fn spawn_server() -> (Arc<RunningServer>, JoinHandle<Result<(), ServeError>>) {
    let server = Arc::new(Server::new(test_config()).start().expect("bind test server"));
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });
    (server, serving)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap()
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Assert a reqwest response carries the fixed liveness response.
async fn assert_ok_response(response: reqwest::Response) {
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/plain"
    );
    assert_eq!(&response.bytes().await.unwrap()[..], b"OK");
}

/// Send raw bytes on a fresh connection and read until the server closes it.
async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(REQUEST_TIMEOUT, stream.read_to_end(&mut response)).await;
    response
}

// =============================================================================
// Response contract
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_method_and_path_gets_ok() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();
    let client = client();

    let methods = [
        reqwest::Method::GET,
        reqwest::Method::POST,
        reqwest::Method::PUT,
        reqwest::Method::DELETE,
        reqwest::Method::PATCH,
        reqwest::Method::OPTIONS,
        reqwest::Method::from_bytes(b"PROPFIND").unwrap(),
    ];

    for method in methods {
        for path in ["/", "/health", "/deeply/nested/path", "/?query=string&x=1"] {
            let response = client
                .request(method.clone(), url(addr, path))
                .header("X-Custom", "anything")
                .header(reqwest::header::ACCEPT, "application/json")
                .body("some request body")
                .send()
                .await
                .unwrap();
            assert_ok_response(response).await;
        }
    }

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_head_request_has_headers_without_body() {
    let (server, serving) = spawn_server();

    let response = client()
        .head(url(server.local_addr(), "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/plain"
    );
    assert!(response.bytes().await.unwrap().is_empty());

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_raw_response_bytes() {
    let (server, serving) = spawn_server();

    let response = raw_exchange(
        server.local_addr(),
        b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {text}");
    assert!(text.to_ascii_lowercase().contains("\r\ncontent-type: text/plain\r\n"));
    assert!(text.to_ascii_lowercase().contains("\r\ncontent-length: 2\r\n"));
    // Body is exactly two bytes, no trailing newline
    assert!(text.ends_with("\r\n\r\nOK"), "got: {text}");

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_bodies_do_not_leak_between_requests() {
    let (server, serving) = spawn_server();
    let client = client();
    let endpoint = url(server.local_addr(), "/submit");

    let first = client
        .post(&endpoint)
        .body("first body, with some content")
        .send()
        .await
        .unwrap();
    let first_status = first.status();
    let first_body = first.bytes().await.unwrap();

    let second = client
        .post(&endpoint)
        .body(vec![0u8, 159, 146, 150, 255])
        .send()
        .await
        .unwrap();
    let second_status = second.status();
    let second_body = second.bytes().await.unwrap();

    assert_eq!(first_status, second_status);
    assert_eq!(first_body, second_body);
    assert_eq!(&second_body[..], b"OK");

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

// =============================================================================
// Concurrency and transport isolation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_requests() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();
    let client = client();

    let requests = (0..128).map(|i| {
        let client = client.clone();
        async move {
            let response = client
                .get(url(addr, &format!("/req/{i}")))
                .send()
                .await
                .unwrap();
            let status = response.status();
            let body = response.bytes().await.unwrap();
            (status, body)
        }
    });

    let results = tokio::time::timeout(REQUEST_TIMEOUT, join_all(requests))
        .await
        .expect("concurrent requests timed out");

    assert_eq!(results.len(), 128);
    for (status, body) in results {
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stalled_connection_does_not_block_others() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();

    // Headers are never terminated, so this request stays in progress
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n")
        .await
        .unwrap();

    let client = client();
    let requests = (0..100).map(|_| {
        let client = client.clone();
        async move { client.get(url(addr, "/")).send().await.unwrap().status() }
    });
    let statuses = tokio::time::timeout(REQUEST_TIMEOUT, join_all(requests))
        .await
        .expect("requests were blocked by a stalled connection");
    assert!(statuses.iter().all(|s| *s == reqwest::StatusCode::OK));

    // The stalled request still completes once its headers are finished
    stalled.write_all(b"\r\n").await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(REQUEST_TIMEOUT, stalled.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {text}");
    assert!(text.ends_with("OK"));

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_request_is_isolated() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();

    let garbage = raw_exchange(addr, b"\x00\x01 not http at all \xff\r\n\r\n").await;
    assert!(
        !garbage.starts_with(b"HTTP/1.1 200"),
        "malformed request must not be answered with 200"
    );

    // A peer that resets mid-request
    let mut reset = TcpStream::connect(addr).await.unwrap();
    reset.write_all(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\nabc").await.unwrap();
    drop(reset);

    let response = client().get(url(addr, "/")).send().await.unwrap();
    assert_ok_response(response).await;
    assert_eq!(server.state(), ServerState::Running);

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_instance_on_same_address_fails_to_bind() {
    let (first, serving) = spawn_server();
    let addr = first.local_addr();

    let config = ServerConfig {
        addr: addr.to_string(),
        ..test_config()
    };
    let second = Server::new(config).start();
    assert!(
        matches!(second, Err(BindError::AddressInUse(a)) if a == addr),
        "expected AddressInUse"
    );

    // The first instance is unaffected
    let response = client().get(url(addr, "/")).send().await.unwrap();
    assert_ok_response(response).await;

    first.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_refuses_new_connections() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();

    let response = client().get(url(addr, "/")).send().await.unwrap();
    assert_ok_response(response).await;

    server.stop().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    serving.await.unwrap().unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
    assert!(client().get(url(addr, "/")).send().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_is_idempotent() {
    let (server, serving) = spawn_server();
    let addr = server.local_addr();

    client().get(url(addr, "/")).send().await.unwrap();

    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    serving.await.unwrap().unwrap();

    server.stop().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
