//! EvalServer — the in-process request handler.

use std::sync::Arc;

use evald_engine::EvaluatorFactory;
use evald_protocol::{EvalRequest, EvalResponse};
use evald_transport::{HandlerError, RequestHandler};
use tracing::debug;

use crate::registry::SessionRegistry;
use crate::supervisor::{Supervisor, SupervisorConfig};

/// Answers wire requests by running them through a [`Supervisor`].
#[derive(Clone)]
pub struct EvalServer {
    supervisor: Supervisor,
}

impl EvalServer {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// Server with a fresh registry over `factory`.
    pub fn with_factory(factory: Arc<dyn EvaluatorFactory>, config: SupervisorConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(factory));
        Self::new(Supervisor::new(registry, config))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.supervisor.registry()
    }
}

impl RequestHandler for EvalServer {
    async fn handle_request(&self, request: EvalRequest) -> Result<EvalResponse, HandlerError> {
        debug!(
            "eval session={:?} timeout={}ms code={}B",
            request.session_key,
            request.timeout_ms,
            request.code.len()
        );
        let output = self.supervisor.run(&request).await;
        Ok(EvalResponse { output })
    }
}
