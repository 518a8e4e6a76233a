//! Execution supervisor — runs one request under a deadline.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use evald_engine::CancelToken;
use evald_protocol::{EvalRequest, TIMEOUT_SENTINEL};
use tracing::{debug, error, warn};

use crate::registry::{Session, SessionRegistry};

/// Supervisor configuration.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    /// Replace a session's context after an evaluation on it was cancelled,
    /// instead of continuing with whatever state the interrupted code left.
    pub reset_on_timeout: bool,
}

/// Runs evaluations against registry sessions with deadline enforcement.
///
/// Each evaluation runs on a blocking thread that owns the session lock. On
/// timeout the cancel token is set and the sentinel returned immediately; the
/// background evaluation keeps the session locked until it notices the token
/// (or finishes), so later requests on that key queue behind it rather than
/// interleave with it.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(registry: Arc<SessionRegistry>, config: SupervisorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Evaluate `request` and return the text to send back.
    ///
    /// Never fails: evaluation faults and scheduling faults come back as text,
    /// a missed deadline as [`TIMEOUT_SENTINEL`].
    pub async fn run(&self, request: &EvalRequest) -> String {
        let code = request.code.trim();
        if code.is_empty() {
            return String::new();
        }

        let session = self.registry.get(&request.session_key);
        let cancel = CancelToken::new();
        let work = self.evaluate(session, code.to_string(), cancel.clone());

        if request.timeout_ms == 0 {
            return work.await;
        }

        let deadline = Duration::from_millis(u64::from(request.timeout_ms));
        match tokio::time::timeout(deadline, work).await {
            Ok(output) => output,
            Err(_) => {
                cancel.cancel();
                warn!(
                    "Evaluation on session {:?} timed out after {}ms",
                    request.session_key, request.timeout_ms
                );
                TIMEOUT_SENTINEL.to_string()
            }
        }
    }

    async fn evaluate(&self, session: Arc<Session>, code: String, cancel: CancelToken) -> String {
        let mut state = session.lock().await;
        let registry = self.registry.clone();
        let reset_on_timeout = self.config.reset_on_timeout;
        let key = session.key().to_string();

        let handle = tokio::task::spawn_blocking(move || {
            state.prime(registry.prelude(), &cancel);

            let result = catch_unwind(AssertUnwindSafe(|| state.context.evaluate(&code, &cancel)));
            let output = match result {
                Ok(output) => output,
                Err(payload) => {
                    // The evaluator's internal state is unknown after a panic.
                    let mut output = state.context.take_output();
                    output.push_str(&format!("evaluator panicked: {}\n", panic_message(&*payload)));
                    error!("Evaluator panicked on session {key:?}; context rebuilt");
                    state.reset(registry.new_context());
                    output
                }
            };

            if cancel.is_cancelled() && reset_on_timeout {
                debug!("Resetting session {key:?} after cancelled evaluation");
                state.reset(registry.new_context());
            }
            state.evaluations += 1;
            output
        });

        match handle.await {
            Ok(output) => output,
            Err(e) => {
                error!("Evaluation task failed: {e}");
                format!("{e}\n")
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
