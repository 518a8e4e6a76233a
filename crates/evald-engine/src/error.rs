//! Evaluation faults.

use thiserror::Error;

/// An error raised while running submitted code.
///
/// Faults are data from the caller's point of view: the context renders them
/// into the captured output instead of propagating them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalFault {
    #[error("syntax error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("error: {0}")]
    Runtime(String),

    #[error("interrupted")]
    Interrupted,
}

impl EvalFault {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}
