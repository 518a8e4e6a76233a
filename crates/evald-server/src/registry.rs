//! SessionRegistry — lazily created, never evicted evaluation contexts.

use std::sync::Arc;

use dashmap::DashMap;
use evald_engine::{CancelToken, EvaluationContext, EvaluatorFactory};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Everything a session owns. Guarded by the session's mutex, so at most one
/// evaluation touches it at a time.
#[derive(Debug)]
pub struct SessionState {
    pub context: EvaluationContext,
    /// Whether the registry prelude has been evaluated into this context.
    pub primed: bool,
    /// Evaluations completed on this session.
    pub evaluations: u64,
}

/// One session: a key and its exclusively locked state.
pub struct Session {
    key: String,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(key: &str, context: EvaluationContext) -> Self {
        Self {
            key: key.to_string(),
            state: Arc::new(Mutex::new(SessionState {
                context,
                primed: false,
                evaluations: 0,
            })),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquire exclusive use of this session's context.
    ///
    /// The guard is owned so it can move onto a blocking thread; the lock is
    /// held until the evaluation running there finishes, even if the caller
    /// stopped waiting for it.
    pub async fn lock(&self) -> OwnedMutexGuard<SessionState> {
        self.state.clone().lock_owned().await
    }

    /// Non-blocking probe, mainly for diagnostics and tests.
    pub fn try_lock(&self) -> Option<OwnedMutexGuard<SessionState>> {
        self.state.clone().try_lock_owned().ok()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Maps session keys to sessions.
///
/// `get` is an atomic get-or-create: concurrent callers asking for the same
/// unseen key all receive the same instance. There is no removal, so memory
/// grows with the number of distinct keys ever seen.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    factory: Arc<dyn EvaluatorFactory>,
    prelude: Option<String>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn EvaluatorFactory>) -> Self {
        info!("Session registry using {} evaluator", factory.name());
        Self {
            sessions: DashMap::new(),
            factory,
            prelude: None,
        }
    }

    /// Code evaluated once into every new session before its first request.
    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        let prelude = prelude.into();
        self.prelude = (!prelude.trim().is_empty()).then_some(prelude);
        self
    }

    pub fn get(&self, key: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.get(key) {
            return session.clone();
        }
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating session {key:?}");
                Arc::new(Session::new(key, self.new_context()))
            })
            .clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// A fresh context from this registry's factory.
    pub fn new_context(&self) -> EvaluationContext {
        EvaluationContext::new(self.factory.create())
    }

    pub fn prelude(&self) -> Option<&str> {
        self.prelude.as_deref()
    }
}

impl SessionState {
    /// Evaluate `prelude` once, discarding its output.
    pub fn prime(&mut self, prelude: Option<&str>, cancel: &CancelToken) {
        if self.primed {
            return;
        }
        self.primed = true;
        if let Some(code) = prelude {
            let output = self.context.evaluate(code, cancel);
            debug!("Prelude evaluated ({} bytes of output discarded)", output.len());
            self.context.clear_capture();
        }
    }

    /// Swap in a fresh context. The prelude runs again before the next request.
    pub fn reset(&mut self, context: EvaluationContext) {
        self.context = context;
        self.primed = false;
    }
}
