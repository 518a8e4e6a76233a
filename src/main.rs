//! evald — persistent-session code evaluation service.
//!
//! Accepts evaluation requests over a Unix domain socket, routes each to a
//! named session whose state survives between requests, and answers with the
//! captured output under a per-request deadline.
//!
//! Usage:
//!   evald serve /tmp/evald.sock                     # In-process evaluation
//!   evald serve /tmp/evald.sock --isolated          # Evaluate in a worker process
//!   evald send /tmp/evald.sock --key alice 'let x = 1'
//!   echo 'x + 1' | evald send /tmp/evald.sock --key alice

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use evald_bridge::{WorkerBridge, WorkerBridgeConfig, run_worker};
use evald_engine::ScriptEvaluatorFactory;
use evald_protocol::{DEFAULT_MAX_FRAME_BYTES, EvalRequest};
use evald_server::{EvalServer, SessionRegistry, Supervisor, SupervisorConfig};
use evald_transport::{
    EvalClient, OutputLimits, RequestHandler, TransportConfig, TransportServer, shape_output,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "evald", about = "Persistent-session code evaluation over a Unix socket")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Append logs to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen on a socket and evaluate requests
    Serve(ServeArgs),
    /// Worker half of `serve --isolated`; speaks tagged frames on stdin/stdout
    #[command(hide = true)]
    Worker(EngineArgs),
    /// Send one request to a running server and print the shaped output
    Send(SendArgs),
}

/// Options shared by the in-process server and the worker.
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Replace a session's state after one of its evaluations times out
    #[arg(long)]
    reset_on_timeout: bool,

    /// Code evaluated once into every new session
    #[arg(long)]
    prelude: Option<PathBuf>,

    /// Largest accepted frame body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Socket path to listen on
    socket: PathBuf,

    /// Run evaluations in a child worker process
    #[arg(long)]
    isolated: bool,

    /// Maximum concurrently handled connections
    #[arg(long, default_value = "32")]
    max_connections: usize,

    /// Lift the connection limit entirely
    #[arg(long, conflicts_with = "max_connections")]
    unbounded: bool,

    /// Serve several requests per connection
    #[arg(long)]
    keep_alive: bool,

    /// Milliseconds a connection may take to send a complete request (0 waits forever)
    #[arg(long, default_value = "30000")]
    read_timeout_ms: u64,

    /// Extra milliseconds past a deadline before an isolated worker is killed
    #[arg(long, default_value = "2000")]
    kill_grace_ms: u64,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Socket path of the server
    socket: PathBuf,

    /// Session key
    #[arg(long, default_value = "")]
    key: String,

    /// Deadline in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "20000")]
    timeout: u32,

    /// Maximum output lines printed
    #[arg(long, default_value = "20")]
    max_lines: usize,

    /// Output lines longer than this are wrapped
    #[arg(long, default_value = "400")]
    max_line_len: usize,

    /// Code to evaluate (read from stdin when absent)
    code: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }

    match cli.command {
        Command::Serve(args) => serve(args, cli.verbose).await,
        Command::Worker(args) => worker(args).await,
        Command::Send(args) => send(args).await,
    }
}

/// Stderr by default; the worker's stdout carries frames and must stay clean.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn supervisor(args: &EngineArgs) -> Supervisor {
    let mut registry = SessionRegistry::new(Arc::new(ScriptEvaluatorFactory));
    if let Some(path) = &args.prelude {
        match std::fs::read_to_string(path) {
            Ok(code) => registry = registry.with_prelude(code),
            Err(e) => {
                error!("Failed to read prelude {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }
    Supervisor::new(
        Arc::new(registry),
        SupervisorConfig {
            reset_on_timeout: args.reset_on_timeout,
        },
    )
}

async fn serve(args: ServeArgs, verbose: bool) {
    let transport_config = TransportConfig {
        socket_path: args.socket.clone(),
        max_connections: (!args.unbounded).then_some(args.max_connections),
        keep_alive: args.keep_alive,
        max_frame_bytes: args.engine.max_frame_bytes,
        read_timeout: (args.read_timeout_ms > 0).then(|| Duration::from_millis(args.read_timeout_ms)),
        ..TransportConfig::default()
    };

    if !args.isolated {
        let server = EvalServer::new(supervisor(&args.engine));
        run_until_shutdown(transport_config, Arc::new(server)).await;
        return;
    }

    let program = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            error!("Cannot locate own executable for the worker: {e}");
            std::process::exit(1);
        }
    };

    // The worker gets the same engine options the in-process server would use.
    let mut worker_args = vec![
        "worker".to_string(),
        "--max-frame-bytes".into(),
        args.engine.max_frame_bytes.to_string(),
    ];
    if args.engine.reset_on_timeout {
        worker_args.push("--reset-on-timeout".into());
    }
    if let Some(prelude) = &args.engine.prelude {
        worker_args.push("--prelude".into());
        worker_args.push(prelude.to_string_lossy().into_owned());
    }
    if verbose {
        worker_args.push("--verbose".into());
    }

    let bridge = match WorkerBridge::start(WorkerBridgeConfig {
        program,
        args: worker_args,
        kill_grace_ms: args.kill_grace_ms,
        max_frame_bytes: args.engine.max_frame_bytes,
    })
    .await
    {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => {
            error!("Failed to start worker: {e}");
            std::process::exit(1);
        }
    };

    run_until_shutdown(transport_config, bridge.clone()).await;
    bridge.shutdown().await;
}

async fn run_until_shutdown<H: RequestHandler>(config: TransportConfig, handler: Arc<H>) {
    let mut transport = match TransportServer::start_with_handler(config, handler).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "evald {} serving on {} (Ctrl+C to stop)",
        env!("CARGO_PKG_VERSION"),
        transport.socket_path().display()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    info!("Shutting down");
    transport.stop().await;
}

async fn worker(args: EngineArgs) {
    let supervisor = supervisor(&args);
    let result = run_worker(
        tokio::io::stdin(),
        tokio::io::stdout(),
        supervisor,
        args.max_frame_bytes,
    )
    .await;

    if let Err(e) = result {
        error!("Worker failed: {e}");
        std::process::exit(1);
    }
}

async fn send(args: SendArgs) {
    let code = match args.code {
        Some(code) => code,
        None => {
            let mut code = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut code) {
                error!("Failed to read code from stdin: {e}");
                std::process::exit(1);
            }
            code
        }
    };

    let request = EvalRequest::new(args.key, code).with_timeout(args.timeout);
    let response = match EvalClient::eval_once(&args.socket, &request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Request failed: {e}");
            std::process::exit(1);
        }
    };

    let shaped = shape_output(
        &response.output,
        OutputLimits {
            max_lines: args.max_lines,
            max_line_len: args.max_line_len,
        },
    );
    for line in &shaped.lines {
        println!("{line}");
    }
    if shaped.truncated {
        println!("...");
    }
}
