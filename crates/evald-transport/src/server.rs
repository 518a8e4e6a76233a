//! Unix socket transport server.
//!
//! Accepts connections on a filesystem socket, reads request frames, routes
//! them to a [`RequestHandler`], and writes response frames back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use evald_protocol::{
    DEFAULT_MAX_FRAME_BYTES, EvalRequest, EvalResponse, FramingError, HEADER_LEN, RequestHeader,
    encode_response,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, TransportError};

/// Implemented by whatever answers requests (in-process server or worker
/// bridge). The transport calls it once per decoded frame.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a request and return a response.
    ///
    /// An `Err` closes the connection without a response frame.
    fn handle_request(
        &self,
        request: EvalRequest,
    ) -> impl std::future::Future<Output = Result<EvalResponse, HandlerError>> + Send;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Filesystem path of the listening socket
    pub socket_path: PathBuf,
    /// Maximum concurrently handled connections (`None` = unbounded)
    pub max_connections: Option<usize>,
    /// Serve multiple request/response pairs per connection
    pub keep_alive: bool,
    /// Largest accepted request body (key + code)
    pub max_frame_bytes: usize,
    /// Permission bits applied to the socket after bind
    pub socket_mode: u32,
    /// How long a connection may take to deliver a complete request frame
    /// (`None` = wait forever). Idle keep-alive connections count too.
    pub read_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/evald.sock"),
            max_connections: Some(32),
            keep_alive: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            socket_mode: 0o777,
            read_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Shared state for the accept loop and connection tasks.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    /// Connected client count
    client_count: AtomicUsize,
}

/// The transport server — owns the listening socket and its accept loop.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Accept loop handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Bound socket path
    socket_path: PathBuf,
}

impl TransportServer {
    /// Start the transport server with the given request handler.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_with_handler(config, Arc::new(handler)).await
    }

    /// Start the transport server with a shared handler.
    pub async fn start_with_handler<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let listener = bind(&config.socket_path, config.socket_mode)?;
        let socket_path = config.socket_path.clone();
        info!("evald transport listening on {}", socket_path.display());

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(AppState {
            handler,
            config,
            client_count: AtomicUsize::new(0),
        });

        let handle = tokio::spawn(accept_loop(listener, state, shutdown_rx));

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            socket_path,
        })
    }

    /// Get the bound socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting connections and remove the socket file.
    ///
    /// Connections already being handled run to completion in the background.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("evald transport server stopped");
    }
}

/// Remove any stale socket, bind, and open up permissions.
fn bind(path: &Path, mode: u32) -> Result<UnixListener, TransportError> {
    let bind_err = |source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
    }

    Ok(listener)
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop<H: RequestHandler>(
    listener: UnixListener,
    state: Arc<AppState<H>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let limit = state
        .config
        .max_connections
        .map(|max| Arc::new(Semaphore::new(max.max(1))));

    loop {
        // Admission: wait for a free slot before accepting, so excess clients
        // queue in the listen backlog instead of spawning more handlers.
        let permit = match &limit {
            Some(semaphore) => tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => Some(p),
                    Err(_) => break,
                },
                _ = shutdown_rx.recv() => break,
            },
            None => None,
        };

        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        // Transient (e.g. EMFILE); keep serving.
                        error!("Accept failed: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    debug!("Accept loop ended");
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_connection<H: RequestHandler>(mut stream: UnixStream, state: Arc<AppState<H>>) {
    let total = state.client_count.fetch_add(1, Ordering::Relaxed) + 1;
    let conn_id = uuid::Uuid::new_v4();
    debug!("Connection opened: {conn_id} (active: {total})");

    loop {
        let read = read_request(&mut stream, state.config.max_frame_bytes);
        let read = match state.config.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(read) => read,
                Err(_) => {
                    debug!("Dropping connection {conn_id}: no complete frame within {limit:?}");
                    break;
                }
            },
            None => read.await,
        };
        let request = match read {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!("Dropping connection {conn_id}: {e}");
                break;
            }
        };

        let response = match state.handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request on {conn_id} failed, closing without response: {e}");
                break;
            }
        };

        if let Err(e) = write_response(&mut stream, &response).await {
            debug!("Failed to write response on {conn_id}: {e}");
            break;
        }

        if !state.config.keep_alive {
            break;
        }
    }

    let _ = stream.shutdown().await;
    let remaining = state.client_count.fetch_sub(1, Ordering::Relaxed) - 1;
    debug!("Connection closed: {conn_id} (active: {remaining})");
}

/// Read one request frame.
///
/// Returns `Ok(None)` if the peer closed the stream before sending any byte of
/// a new frame. A frame cut short anywhere else is a `FramingError`.
pub async fn read_request<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<EvalRequest>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FramingError::Truncated {
                expected: HEADER_LEN,
                actual: filled,
            });
        }
        filled += n;
    }

    let header = RequestHeader::parse(&header)?;
    header.check_limit(max_frame_bytes)?;

    let mut body = vec![0u8; header.body_len()];
    read_full(reader, &mut body).await?;
    Ok(Some(header.decode_body(&body)?))
}

/// Write one response frame and flush.
pub async fn write_response<W>(writer: &mut W, response: &EvalResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_response(response)).await?;
    writer.flush().await
}

/// Fill `buf` completely, reporting how much arrived if the peer hung up.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(FramingError::Truncated {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
