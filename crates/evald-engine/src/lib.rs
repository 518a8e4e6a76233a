//! Evaluation engine contract.
//!
//! The service treats the language evaluator as an external collaborator. An
//! evaluator must be constructible once and reused across calls with its state
//! intact, must write its textual output into the [`OutputCapture`] it is
//! handed, and must tolerate being asked to stop via a [`CancelToken`].
//!
//! [`script`] provides the built-in reference evaluator.

pub mod cancel;
pub mod capture;
pub mod context;
pub mod error;
pub mod script;

pub use cancel::CancelToken;
pub use capture::OutputCapture;
pub use context::EvaluationContext;
pub use error::EvalFault;
pub use script::{ScriptEvaluator, ScriptEvaluatorFactory};

/// One persistent instance of a language evaluator.
pub trait Evaluator: Send {
    /// Run `code` against this evaluator's accumulated state.
    ///
    /// Output produced by the code goes to `out`. On success, `Some(repr)` is
    /// the textual representation of the value the code produced, if any.
    /// Implementations should poll `cancel` between units of work and return
    /// [`EvalFault::Interrupted`] once it is set.
    fn evaluate(
        &mut self,
        code: &str,
        out: &mut OutputCapture,
        cancel: &CancelToken,
    ) -> Result<Option<String>, EvalFault>;
}

/// Builds fresh evaluators for new sessions.
pub trait EvaluatorFactory: Send + Sync {
    /// Name of the language this factory evaluates (for logs).
    fn name(&self) -> &str;

    fn create(&self) -> Box<dyn Evaluator>;
}
