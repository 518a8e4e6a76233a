//! Worker bridge — runs evaluations in a child process.
//!
//! The front end keeps the socket and hands each request to an `evald worker`
//! subprocess over its stdin/stdout. The worker enforces deadlines itself; the
//! front end only kills it when it stops answering altogether. A worker that
//! dies is not replaced: the bridge goes dead and refuses further requests.

pub mod error;
pub mod frame;
pub mod worker;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use evald_protocol::{
    DEFAULT_MAX_FRAME_BYTES, EvalRequest, EvalResponse, FrameTag, TIMEOUT_SENTINEL, WorkerRequest,
    WorkerResponse, worker::decode_message,
};
use evald_transport::{HandlerError, RequestHandler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use error::BridgeError;
pub use frame::{read_frame, write_frame};
pub use worker::run_worker;

/// How to launch and supervise the worker process.
#[derive(Debug, Clone)]
pub struct WorkerBridgeConfig {
    /// Worker executable
    pub program: PathBuf,
    /// Arguments, e.g. `["worker"]`
    pub args: Vec<String>,
    /// Extra time past a request's deadline before the worker is killed
    pub kill_grace_ms: u64,
    /// Largest accepted response payload
    pub max_frame_bytes: usize,
}

impl Default for WorkerBridgeConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("evald"),
            args: vec!["worker".into()],
            kill_grace_ms: 2_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Live pipes to the worker. Dropping this kills the child.
struct WorkerIo {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

/// Request handler that relays to a worker subprocess.
pub struct WorkerBridge {
    config: WorkerBridgeConfig,
    /// Held for the whole exchange, so one request is in flight at a time.
    io: Mutex<Option<WorkerIo>>,
    dead: AtomicBool,
}

impl WorkerBridge {
    /// Spawn the worker.
    pub async fn start(config: WorkerBridgeConfig) -> Result<Self, BridgeError> {
        info!("Starting worker: {} {}", config.program.display(), config.args.join(" "));

        let spawn_err = |source| BridgeError::Spawn {
            program: config.program.clone(),
            source,
        };

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let missing = |what: &str| spawn_err(std::io::Error::other(format!("worker {what} not piped")));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        // Stderr logger
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[worker] {line}");
            }
        });

        info!("Worker started (pid {:?})", child.id());
        Ok(Self {
            config,
            io: Mutex::new(Some(WorkerIo { child, stdin, stdout })),
            dead: AtomicBool::new(false),
        })
    }

    /// Whether the worker has crashed or been killed.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    /// Relay one request and return the output text.
    ///
    /// A request still queued behind others at its deadline gets the timeout
    /// sentinel and leaves the worker alone. A worker that outlives the
    /// deadline plus grace is killed and the sentinel returned. Any channel
    /// failure is a `WorkerCrash`.
    pub async fn request(&self, request: &EvalRequest) -> Result<String, BridgeError> {
        let code = request.code.trim();
        if code.is_empty() {
            return Ok(String::new());
        }
        if self.is_dead() {
            return Err(BridgeError::WorkerCrash("worker is no longer running".into()));
        }

        // The deadline covers queueing behind other requests, as it does in
        // the in-process supervisor.
        let deadline = (request.timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(u64::from(request.timeout_ms)));
        let mut guard = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.io.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Worker busy past the deadline of a {}ms request", request.timeout_ms);
                    return Ok(TIMEOUT_SENTINEL.to_string());
                }
            },
            None => self.io.lock().await,
        };
        let Some(io) = guard.as_mut() else {
            return Err(BridgeError::WorkerCrash("worker is no longer running".into()));
        };

        // The worker gets whatever time is left, so a healthy worker always
        // answers before the kill limit.
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if remaining == Some(Duration::ZERO) {
            return Ok(TIMEOUT_SENTINEL.to_string());
        }
        let timeout_millis = remaining.map_or(0, |r| {
            u32::try_from(r.as_millis()).unwrap_or(u32::MAX).max(1)
        });

        let frame = WorkerRequest {
            timeout_millis,
            code: code.to_string(),
            session_key: Some(request.session_key.clone()),
        }
        .encode()?;

        let limit = remaining.map(|r| r + Duration::from_millis(self.config.kill_grace_ms));
        let work = exchange(io, &frame, self.config.max_frame_bytes);
        let outcome = match limit {
            Some(limit) => tokio::time::timeout(limit, work).await.ok(),
            None => Some(work.await),
        };

        let Some(result) = outcome else {
            warn!(
                "Worker did not answer within {}ms; killing it",
                limit.unwrap_or_default().as_millis()
            );
            self.bury(&mut guard).await;
            return Ok(TIMEOUT_SENTINEL.to_string());
        };

        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                error!("Worker channel failed: {e}");
                self.bury(&mut guard).await;
                Err(BridgeError::WorkerCrash(e.to_string()))
            }
        }
    }

    /// Kill the worker and refuse further requests.
    pub async fn shutdown(&self) {
        let mut guard = self.io.lock().await;
        self.bury(&mut guard).await;
    }

    async fn bury(&self, io: &mut Option<WorkerIo>) {
        self.dead.store(true, Ordering::Relaxed);
        if let Some(mut io) = io.take() {
            let _ = io.child.kill().await;
            info!("Worker subprocess terminated");
        }
    }
}

/// Write one request frame and read back its response.
async fn exchange(io: &mut WorkerIo, frame: &[u8], max_frame_bytes: usize) -> Result<String, BridgeError> {
    write_frame(&mut io.stdin, frame).await?;
    let Some((header, payload)) = read_frame(&mut io.stdout, max_frame_bytes).await? else {
        return Err(BridgeError::WorkerCrash("worker closed its output".into()));
    };
    header.expect(FrameTag::Response)?;
    let response: WorkerResponse = decode_message(&payload)?;
    Ok(response.output)
}

impl RequestHandler for WorkerBridge {
    async fn handle_request(&self, request: EvalRequest) -> Result<EvalResponse, HandlerError> {
        debug!(
            "relay session={:?} timeout={}ms code={}B",
            request.session_key,
            request.timeout_ms,
            request.code.len()
        );
        match self.request(&request).await {
            Ok(output) => Ok(EvalResponse { output }),
            Err(e) => Err(HandlerError::new(e.to_string())),
        }
    }
}
