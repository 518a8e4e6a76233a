//! Process isolation — the real `evald worker` behind a `WorkerBridge`, and
//! the `serve --isolated` / `send` command line end to end.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use evald_bridge::{WorkerBridge, WorkerBridgeConfig};
use evald_protocol::{EvalRequest, TIMEOUT_SENTINEL};
use evald_transport::{EvalClient, TransportConfig, TransportServer};
use tempfile::TempDir;
use tokio::process::Command;

const EVALD: &str = env!("CARGO_BIN_EXE_evald");

async fn worker_bridge(extra: &[&str]) -> WorkerBridge {
    let mut args = vec!["worker".to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    WorkerBridge::start(WorkerBridgeConfig {
        program: EVALD.into(),
        args,
        kill_grace_ms: 1_000,
        ..WorkerBridgeConfig::default()
    })
    .await
    .unwrap()
}

async fn ask(bridge: &WorkerBridge, key: &str, code: &str) -> String {
    let request = EvalRequest::new(key, code).with_timeout(5_000);
    bridge.request(&request).await.unwrap()
}

async fn wait_for_socket(path: &Path) {
    let started = Instant::now();
    while !path.exists() {
        assert!(started.elapsed() < Duration::from_secs(10), "server never bound {}", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge to a real worker
// ─────────────────────────────────────────────────────────────────────────────

mod worker {
    use super::*;

    #[tokio::test]
    async fn sessions_live_in_the_worker() {
        let bridge = worker_bridge(&[]).await;
        assert_eq!(ask(&bridge, "a", "let x = 2").await, "");
        assert_eq!(ask(&bridge, "a", "x * 21").await, "42");
        assert!(ask(&bridge, "b", "x").await.contains("undefined variable"));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn worker_enforces_deadline_and_survives() {
        let bridge = worker_bridge(&[]).await;

        let started = Instant::now();
        let out = bridge
            .request(&EvalRequest::new("k", "while true { }").with_timeout(150))
            .await
            .unwrap();
        assert_eq!(out, TIMEOUT_SENTINEL);
        // Answered by the worker well before the kill backstop.
        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert!(!bridge.is_dead());

        let out = bridge.request(&EvalRequest::new("k", "1 + 1").with_timeout(5_000)).await.unwrap();
        assert_eq!(out, "2");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn deadline_covers_waiting_for_a_busy_worker() {
        let bridge = Arc::new(worker_bridge(&[]).await);

        let slow = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.request(&EvalRequest::new("a", "sleep(1500)\n\"slow\"")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let out = bridge.request(&EvalRequest::new("b", "1").with_timeout(100)).await.unwrap();
        assert_eq!(out, TIMEOUT_SENTINEL);
        assert!(started.elapsed() < Duration::from_millis(1_000));

        assert_eq!(slow.await.unwrap().unwrap(), "\"slow\"");
        assert!(!bridge.is_dead());
        assert_eq!(ask(&bridge, "b", "1").await, "1");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn reset_flag_reaches_the_worker() {
        let bridge = worker_bridge(&["--reset-on-timeout"]).await;

        bridge.request(&EvalRequest::new("k", "let v = 1").with_timeout(5_000)).await.unwrap();
        bridge
            .request(&EvalRequest::new("k", "while true { }").with_timeout(100))
            .await
            .unwrap();
        let out = bridge.request(&EvalRequest::new("k", "v").with_timeout(5_000)).await.unwrap();
        assert!(out.contains("undefined variable"), "got {out:?}");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn bridge_serves_the_socket() {
        let dir = TempDir::new().unwrap();
        let bridge = Arc::new(worker_bridge(&[]).await);
        let config = TransportConfig {
            socket_path: dir.path().join("isolated.sock"),
            ..TransportConfig::default()
        };
        let mut transport = TransportServer::start_with_handler(config, bridge.clone()).await.unwrap();

        let request = EvalRequest::new("s", "print(\"from worker\")").with_timeout(5_000);
        let out = EvalClient::eval_once(transport.socket_path(), &request).await.unwrap();
        assert_eq!(out.output, "from worker\n");

        transport.stop().await;
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn dead_worker_drops_connections() {
        let dir = TempDir::new().unwrap();
        let bridge = Arc::new(worker_bridge(&[]).await);
        bridge.shutdown().await;

        let config = TransportConfig {
            socket_path: dir.path().join("dead.sock"),
            ..TransportConfig::default()
        };
        let mut transport = TransportServer::start_with_handler(config, bridge.clone()).await.unwrap();

        let request = EvalRequest::new("s", "1").with_timeout(1_000);
        assert!(EvalClient::eval_once(transport.socket_path(), &request).await.is_err());

        transport.stop().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

mod cli {
    use super::*;

    async fn send(socket: &Path, args: &[&str], stdin: Option<&str>) -> String {
        let mut cmd = Command::new(EVALD);
        cmd.arg("send").arg(socket).args(args).stdout(Stdio::piped());
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().unwrap();
        if let Some(input) = stdin {
            use tokio::io::AsyncWriteExt;
            let mut pipe = child.stdin.take().unwrap();
            pipe.write_all(input.as_bytes()).await.unwrap();
        }
        let output = child.wait_with_output().await.unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }

    #[tokio::test]
    async fn serve_isolated_and_send() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("cli.sock");
        let prelude = dir.path().join("prelude.evl");
        std::fs::write(&prelude, "let greeting = \"hi\"").unwrap();

        let mut server = Command::new(EVALD)
            .arg("serve")
            .arg(&socket)
            .arg("--isolated")
            .arg("--prelude")
            .arg(&prelude)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        wait_for_socket(&socket).await;

        assert_eq!(send(&socket, &["--key", "me", "greeting"], None).await, "\"hi\"\n");
        assert_eq!(send(&socket, &["--key", "me"], Some("let n = 3")).await, "");
        assert_eq!(send(&socket, &["--key", "me", "--max-lines", "2"], Some("print(n)\nprint(n)\nprint(n)")).await, "3\n3\n...\n");

        server.kill().await.unwrap();
    }
}
