//! Per-context output buffer.

use std::fmt;

/// Accumulates everything an evaluator prints during one call.
///
/// Each [`crate::EvaluationContext`] owns its own capture, so concurrent
/// evaluations in different sessions never share a buffer.
#[derive(Debug, Default)]
pub struct OutputCapture {
    buf: String,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn push_str(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    pub fn contents(&self) -> &str {
        &self.buf
    }

    /// Move the captured text out, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

impl fmt::Write for OutputCapture {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        Ok(())
    }
}
