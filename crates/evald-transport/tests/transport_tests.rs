//! Transport tests — socket setup, framing isolation, keep-alive, admission.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use evald_protocol::{EvalRequest, EvalResponse, encode_request};
use evald_transport::*;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Echoes `session_key:code`; sleeps when the code is `slow`.
#[derive(Default)]
struct Echo {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RequestHandler for Echo {
    async fn handle_request(&self, request: EvalRequest) -> Result<EvalResponse, HandlerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if request.code == "slow" {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if request.code == "fail" {
            return Err(HandlerError::new("handler refused"));
        }
        Ok(EvalResponse::new(format!("{}:{}", request.session_key, request.code)))
    }
}

fn socket_in(dir: &TempDir) -> PathBuf {
    dir.path().join("evald.sock")
}

async fn start(dir: &TempDir, tweak: impl FnOnce(&mut TransportConfig)) -> (TransportServer, Arc<Echo>) {
    let mut config = TransportConfig {
        socket_path: socket_in(dir),
        ..TransportConfig::default()
    };
    tweak(&mut config);
    let handler = Arc::new(Echo::default());
    let server = TransportServer::start_with_handler(config, handler.clone()).await.unwrap();
    (server, handler)
}

#[tokio::test]
async fn serves_one_request_per_connection() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |_| {}).await;

    let resp = EvalClient::eval_once(server.socket_path(), &EvalRequest::new("k", "x")).await.unwrap();
    assert_eq!(resp.output, "k:x");

    // Without keep-alive the server closes after the first response.
    let mut client = EvalClient::connect(server.socket_path()).await.unwrap();
    client.eval(&EvalRequest::new("a", "1")).await.unwrap();
    assert!(client.eval(&EvalRequest::new("a", "2")).await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn keep_alive_serves_sequential_frames() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |c| c.keep_alive = true).await;

    let mut client = EvalClient::connect(server.socket_path()).await.unwrap();
    for i in 0..3 {
        let resp = client.eval(&EvalRequest::new("s", i.to_string())).await.unwrap();
        assert_eq!(resp.output, format!("s:{i}"));
    }

    server.stop().await;
}

#[tokio::test]
async fn truncated_frame_drops_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |_| {}).await;

    // Declare 100 bytes of code, send 3, then hang up the write side.
    let mut frame = encode_request(&EvalRequest::new("k", "abc"));
    frame[8..12].copy_from_slice(&100u32.to_le_bytes());
    let mut bad = UnixStream::connect(server.socket_path()).await.unwrap();
    bad.write_all(&frame).await.unwrap();
    bad.shutdown().await.unwrap();

    let mut buf = Vec::new();
    let n = timeout(Duration::from_secs(5), bad.read_to_end(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "no partial response for a framing error");

    let resp = EvalClient::eval_once(server.socket_path(), &EvalRequest::new("k", "ok")).await.unwrap();
    assert_eq!(resp.output, "k:ok");

    server.stop().await;
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |c| c.max_frame_bytes = 8).await;

    let mut client = EvalClient::connect(server.socket_path()).await.unwrap();
    assert!(client.eval(&EvalRequest::new("key", "too long")).await.is_err());

    let resp = EvalClient::eval_once(server.socket_path(), &EvalRequest::new("k", "ok")).await.unwrap();
    assert_eq!(resp.output, "k:ok");

    server.stop().await;
}

#[tokio::test]
async fn handler_error_closes_without_response() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |_| {}).await;

    let err = EvalClient::eval_once(server.socket_path(), &EvalRequest::new("k", "fail")).await;
    assert!(err.is_err());

    server.stop().await;
}

#[tokio::test]
async fn stale_socket_is_replaced_and_world_accessible() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    std::fs::write(&path, b"stale").unwrap();

    let (mut server, _) = start(&dir, |_| {}).await;
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o777);

    server.stop().await;
    assert!(!path.exists(), "stop removes the socket");
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let config = TransportConfig {
        socket_path: PathBuf::from("/nonexistent-dir/evald.sock"),
        ..TransportConfig::default()
    };
    let result = TransportServer::start(config, Echo::default()).await;
    assert!(matches!(result, Err(TransportError::Bind { .. })));
}

#[tokio::test]
async fn admission_limit_bounds_concurrent_handlers() {
    let dir = TempDir::new().unwrap();
    let (mut server, handler) = start(&dir, |c| c.max_connections = Some(2)).await;
    let path = server.socket_path().to_path_buf();

    let mut tasks = Vec::new();
    for i in 0..6 {
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            EvalClient::eval_once(&path, &EvalRequest::new(i.to_string(), "slow")).await
        }));
    }
    for task in tasks {
        let resp = timeout(Duration::from_secs(10), task).await.unwrap().unwrap().unwrap();
        assert!(resp.output.ends_with(":slow"));
    }
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);

    server.stop().await;
}

#[tokio::test]
async fn idle_connections_cannot_hold_every_slot() {
    let dir = TempDir::new().unwrap();
    let (mut server, _) = start(&dir, |c| {
        c.max_connections = Some(4);
        c.read_timeout = Some(Duration::from_millis(200));
    })
    .await;

    let mut idle = Vec::new();
    for _ in 0..4 {
        idle.push(UnixStream::connect(server.socket_path()).await.unwrap());
    }

    let resp = timeout(
        Duration::from_secs(3),
        EvalClient::eval_once(server.socket_path(), &EvalRequest::new("k", "real")),
    )
    .await
    .expect("request starved by idle connections")
    .unwrap();
    assert_eq!(resp.output, "k:real");

    // The idle peers were hung up on without a response.
    for mut stream in idle {
        let mut buf = Vec::new();
        let n = timeout(Duration::from_secs(3), stream.read_to_end(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }

    server.stop().await;
}

/// Accepts one connection, swallows the request, and replies with `reply` verbatim.
async fn canned_server(dir: &TempDir, reply: Vec<u8>) -> PathBuf {
    let path = socket_in(dir);
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 12];
        stream.read_exact(&mut header).await.unwrap();
        let _ = stream.write_all(&reply).await;
    });
    path
}

#[tokio::test]
async fn client_decodes_invalid_utf8_as_empty_output() {
    let dir = TempDir::new().unwrap();
    let mut reply = 2u32.to_le_bytes().to_vec();
    reply.extend_from_slice(&[0xff, 0xfe]);
    let path = canned_server(&dir, reply).await;

    let resp = EvalClient::eval_once(&path, &EvalRequest::new("", "")).await.unwrap();
    assert_eq!(resp.output, "");
}

#[tokio::test]
async fn client_reports_how_much_of_a_short_response_arrived() {
    let dir = TempDir::new().unwrap();
    let mut reply = 10u32.to_le_bytes().to_vec();
    reply.extend_from_slice(b"abc");
    let path = canned_server(&dir, reply).await;

    let err = EvalClient::eval_once(&path, &EvalRequest::new("", "")).await.unwrap_err();
    assert!(
        matches!(
            err,
            TransportError::Framing(evald_protocol::FramingError::Truncated { expected: 10, actual: 3 })
        ),
        "{err:?}"
    );
}
