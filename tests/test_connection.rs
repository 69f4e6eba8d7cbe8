use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use warden::config::Limits;
use warden::http::connection::Connection;
use warden::server::pool::WorkerPool;
use warden::server::registry::HandlerRegistry;
use warden::{ConnectionError, Handler, Request, Response, async_trait};

/// Writes a one-line summary of the request followed by the body.
struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn process(&self, request: &mut Request, response: &mut Response<'_>) -> anyhow::Result<()> {
        let spilled = request.body().is_spilled();
        let body = request.body_mut().read_to_bytes().await?;
        let summary = format!(
            "{} {} {} {} {} {}\n",
            request.method(),
            request.script_name(),
            request.path_info(),
            request.query().unwrap_or("-"),
            body.len(),
            spilled
        );
        response.write_all(summary.as_bytes()).await?;
        response.write_all(&body).await?;
        Ok(())
    }
}

struct Flag(Arc<AtomicBool>);

#[async_trait]
impl Handler for Flag {
    async fn process(&self, _request: &mut Request, _response: &mut Response<'_>) -> anyhow::Result<()> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Handler for Failing {
    async fn process(&self, _request: &mut Request, response: &mut Response<'_>) -> anyhow::Result<()> {
        response.write_all(b"HTTP/1.1 200 OK\r\n").await?;
        anyhow::bail!("backend unavailable")
    }
}

struct Panicking;

#[async_trait]
impl Handler for Panicking {
    async fn process(&self, _request: &mut Request, _response: &mut Response<'_>) -> anyhow::Result<()> {
        panic!("handler exploded");
    }
}

struct Exchange {
    result: Result<(), ConnectionError>,
    output: Vec<u8>,
    pool: WorkerPool,
}

fn registry(routes: Vec<(&str, Arc<dyn Handler>)>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (prefix, handler) in routes {
        registry.register(prefix, handler);
    }
    registry
}

/// Sends `input`, closes the client's write side and collects everything
/// the server wrote back.
async fn exchange(registry: HandlerRegistry, limits: Limits, input: &[u8]) -> Exchange {
    let pool = WorkerPool::new(1);
    let slot = pool.try_acquire().unwrap();
    let (client, server) = tokio::io::duplex(1 << 20);
    let connection = Connection::new(server, None, slot, Arc::new(registry), limits, None);
    let task = tokio::spawn(connection.run());

    let (mut reader, mut writer) = tokio::io::split(client);
    // The server may stop reading early and hang up; that is expected.
    let _ = writer.write_all(input).await;
    let _ = writer.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("connection did not finish")
        .expect("connection task panicked");

    let mut output = Vec::new();
    let _ = reader.read_to_end(&mut output).await;

    Exchange { result, output, pool }
}

fn echo_registry() -> HandlerRegistry {
    registry(vec![("/", Arc::new(Echo) as Arc<dyn Handler>), ("/app", Arc::new(Echo) as Arc<dyn Handler>)])
}

#[tokio::test]
async fn test_handler_receives_request() {
    let ex = exchange(
        echo_registry(),
        Limits::default(),
        b"POST /app/users?id=7 HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
    )
    .await;

    assert!(ex.result.is_ok(), "{:?}", ex.result);
    assert_eq!(
        String::from_utf8(ex.output).unwrap(),
        "POST /app /users id=7 5 false\nhello"
    );
    assert_eq!(ex.pool.available(), 1);
}

#[tokio::test]
async fn test_root_route_sees_full_path_info() {
    let ex = exchange(echo_registry(), Limits::default(), b"GET /other HTTP/1.0\r\n\r\n").await;

    assert!(ex.result.is_ok());
    assert_eq!(String::from_utf8(ex.output).unwrap(), "GET / other - 0 false\n");
}

#[tokio::test]
async fn test_large_body_is_spilled_before_dispatch() {
    let limits = Limits {
        max_body: 64,
        chunk_size: 16,
        ..Limits::default()
    };
    let body: Vec<u8> = (0..500).map(|i| b'a' + (i % 26) as u8).collect();
    let mut input = format!("PUT /app HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    input.extend_from_slice(&body);

    let ex = exchange(echo_registry(), limits, &input).await;

    assert!(ex.result.is_ok(), "{:?}", ex.result);
    let (summary, echoed) = ex.output.split_at(ex.output.iter().position(|&b| b == b'\n').unwrap() + 1);
    assert_eq!(summary, b"PUT /app  - 500 true\n");
    assert_eq!(echoed, &body[..]);
}

#[tokio::test]
async fn test_no_handler_closes_without_response() {
    let called = Arc::new(AtomicBool::new(false));
    let routes = registry(vec![("/only", Arc::new(Flag(Arc::clone(&called))) as Arc<dyn Handler>)]);

    let ex = exchange(routes, Limits::default(), b"GET /nope HTTP/1.1\r\n\r\n").await;

    assert!(matches!(ex.result, Err(ConnectionError::NoHandler(ref path)) if path == "/nope"));
    assert!(ex.output.is_empty());
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(ex.pool.available(), 1);
}

#[tokio::test]
async fn test_no_handler_ignores_query() {
    let routes = registry(vec![("/a", Arc::new(Echo) as Arc<dyn Handler>)]);
    let ex = exchange(routes, Limits::default(), b"GET /b?/a HTTP/1.1\r\n\r\n").await;

    assert!(matches!(ex.result, Err(ConnectionError::NoHandler(_))));
}

#[tokio::test]
async fn test_malformed_request_closes_without_response() {
    let called = Arc::new(AtomicBool::new(false));
    let routes = registry(vec![("/", Arc::new(Flag(Arc::clone(&called))) as Arc<dyn Handler>)]);

    let ex = exchange(routes, Limits::default(), b"GET /test HTTP/BAD\r\n\r\n").await;

    assert!(matches!(ex.result, Err(ConnectionError::MalformedRequest(_))));
    assert!(ex.output.is_empty());
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_oversized_head_is_rejected() {
    let mut input = b"GET /test HTTP/1.1\r\n".to_vec();
    for _ in 0..15000 {
        input.extend_from_slice(b"X-Big: stuff\r\n");
    }
    input.extend_from_slice(b"\r\n");

    let ex = exchange(echo_registry(), Limits::default(), &input).await;

    assert!(matches!(ex.result, Err(ConnectionError::HeaderTooLarge(_))));
    assert!(ex.output.is_empty());
}

#[tokio::test]
async fn test_disconnect_during_headers() {
    let called = Arc::new(AtomicBool::new(false));
    let routes = registry(vec![("/", Arc::new(Flag(Arc::clone(&called))) as Arc<dyn Handler>)]);

    let ex = exchange(routes, Limits::default(), b"GET /test HTTP/1.1\r\nHost: exa").await;

    assert!(matches!(ex.result, Err(ConnectionError::ClientDisconnected)));
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(ex.pool.available(), 1);
}

#[tokio::test]
async fn test_disconnect_during_body_skips_handler() {
    let called = Arc::new(AtomicBool::new(false));
    let routes = registry(vec![("/", Arc::new(Flag(Arc::clone(&called))) as Arc<dyn Handler>)]);

    let ex = exchange(
        routes,
        Limits::default(),
        b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\nonly a little",
    )
    .await;

    assert!(matches!(ex.result, Err(ConnectionError::ClientDisconnected)));
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_handler_error_releases_slot() {
    let routes = registry(vec![("/", Arc::new(Failing) as Arc<dyn Handler>)]);
    let ex = exchange(routes, Limits::default(), b"GET / HTTP/1.1\r\n\r\n").await;

    match ex.result {
        Err(ConnectionError::HandlerFailure(err)) => {
            assert!(err.to_string().contains("backend unavailable"))
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
    // Partial output stays on the wire; nothing is appended to it.
    assert_eq!(ex.output, b"HTTP/1.1 200 OK\r\n");
    assert_eq!(ex.pool.available(), 1);
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let routes = registry(vec![("/", Arc::new(Panicking) as Arc<dyn Handler>)]);
    let ex = exchange(routes, Limits::default(), b"GET / HTTP/1.1\r\n\r\n").await;

    match ex.result {
        Err(ConnectionError::HandlerFailure(err)) => {
            assert!(err.to_string().contains("handler exploded"))
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
    assert!(ex.output.is_empty());
    assert_eq!(ex.pool.available(), 1);
}

#[tokio::test]
async fn test_idle_client_times_out() {
    let pool = WorkerPool::new(1);
    let slot = pool.try_acquire().unwrap();
    let (mut client, server) = tokio::io::duplex(1024);
    let connection = Connection::new(
        server,
        None,
        slot,
        Arc::new(echo_registry()),
        Limits::default(),
        Some(Duration::from_millis(50)),
    );

    client.write_all(b"GET / HT").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), connection.run())
        .await
        .expect("idle timeout did not fire");

    assert!(matches!(result, Err(ConnectionError::Timeout)));
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn test_new_connection_waits_for_request_line() {
    let pool = WorkerPool::new(1);
    let (_client, server) = tokio::io::duplex(64);
    let connection = Connection::new(
        server,
        None,
        pool.try_acquire().unwrap(),
        Arc::new(HandlerRegistry::new()),
        Limits::default(),
        None,
    );

    assert_eq!(connection.state().name(), "reading-request-line");
    assert_eq!(pool.busy(), 1);
    drop(connection);
    assert_eq!(pool.busy(), 0);
}

#[tokio::test]
async fn test_oversized_declared_body_skips_handler() {
    let called = Arc::new(AtomicBool::new(false));
    let routes = registry(vec![("/", Arc::new(Flag(Arc::clone(&called))) as Arc<dyn Handler>)]);
    let limits = Limits {
        max_content_length: Some(16),
        ..Limits::default()
    };

    let ex = exchange(
        routes,
        limits,
        b"POST / HTTP/1.1\r\nContent-Length: 17\r\n\r\n0123456789abcdefg",
    )
    .await;

    assert!(matches!(ex.result, Err(ConnectionError::BodyTooLarge(_))));
    assert!(ex.output.is_empty());
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(ex.pool.available(), 1);
}
