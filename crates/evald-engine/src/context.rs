//! Evaluation context — one evaluator plus its capture buffer.

use tracing::debug;

use crate::{CancelToken, EvalFault, Evaluator, OutputCapture};

/// A long-lived handle to one evaluator instance and its output buffer.
pub struct EvaluationContext {
    evaluator: Box<dyn Evaluator>,
    capture: OutputCapture,
}

impl EvaluationContext {
    pub fn new(evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            evaluator,
            capture: OutputCapture::new(),
        }
    }

    /// Evaluate `code` and return everything it printed.
    ///
    /// The capture is cleared first. A produced value's representation is
    /// appended after the printed output; a fault's description is appended
    /// instead of being returned as an error.
    pub fn evaluate(&mut self, code: &str, cancel: &CancelToken) -> String {
        self.capture.clear();
        match self.evaluator.evaluate(code, &mut self.capture, cancel) {
            Ok(Some(repr)) => self.capture.push_str(&repr),
            Ok(None) => {}
            Err(EvalFault::Interrupted) => {
                debug!("evaluation interrupted");
                self.append_line(&EvalFault::Interrupted.to_string());
            }
            Err(fault) => self.append_line(&fault.to_string()),
        }
        self.capture.contents().to_owned()
    }

    /// Append a line of text, starting a new line if the capture does not end
    /// with one.
    pub fn append_line(&mut self, line: &str) {
        if !self.capture.is_empty() && !self.capture.contents().ends_with('\n') {
            self.capture.push_str("\n");
        }
        self.capture.push_str(line);
        self.capture.push_str("\n");
    }

    pub fn capture(&self) -> &OutputCapture {
        &self.capture
    }

    pub fn clear_capture(&mut self) {
        self.capture.clear();
    }

    /// Take the captured text, leaving the buffer empty.
    pub fn take_output(&mut self) -> String {
        self.capture.take()
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("captured", &self.capture.len())
            .finish_non_exhaustive()
    }
}
