//! Client side of the wire protocol, plus output shaping for callers that
//! relay results into line-limited channels (chat bots, terminals).

use std::path::{Path, PathBuf};

use evald_protocol::{EvalRequest, EvalResponse, decode_response, encode_request};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::error::TransportError;
use crate::server::read_full;

/// A connection to an evald socket.
///
/// Against a server without keep-alive each connection carries one request;
/// [`EvalClient::eval_once`] is the convenient form for that.
pub struct EvalClient {
    stream: UnixStream,
    path: PathBuf,
}

impl EvalClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| TransportError::Connect {
                path: path.clone(),
                source,
            })?;
        Ok(Self { stream, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one request and wait for its response.
    pub async fn eval(&mut self, request: &EvalRequest) -> Result<EvalResponse, TransportError> {
        self.stream.write_all(&encode_request(request)).await?;
        self.stream.flush().await?;

        let mut frame = vec![0u8; 4];
        read_full(&mut self.stream, &mut frame).await?;
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;

        frame.resize(4 + len, 0);
        read_full(&mut self.stream, &mut frame[4..]).await?;
        Ok(decode_response(&frame)?)
    }

    /// Connect, send one request, and return its response.
    pub async fn eval_once(
        path: impl AsRef<Path>,
        request: &EvalRequest,
    ) -> Result<EvalResponse, TransportError> {
        Self::connect(path).await?.eval(request).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output shaping
// ─────────────────────────────────────────────────────────────────────────────

/// Limits applied by [`shape_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    /// Maximum number of lines kept
    pub max_lines: usize,
    /// Lines longer than this many characters are hard-wrapped
    pub max_line_len: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_lines: 20,
            max_line_len: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedOutput {
    pub lines: Vec<String>,
    /// Lines were dropped to honor `max_lines`.
    pub truncated: bool,
}

/// Trim each line, drop blank ones, hard-wrap long ones on char boundaries,
/// then keep at most `max_lines`.
pub fn shape_output(text: &str, limits: OutputLimits) -> ShapedOutput {
    let width = limits.max_line_len.max(1);
    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut rest = line;
        while let Some((idx, _)) = rest.char_indices().nth(width) {
            let (part, after) = rest.split_at(idx);
            lines.push(part.to_string());
            rest = after;
        }
        if !rest.is_empty() {
            lines.push(rest.to_string());
        }
    }

    let truncated = lines.len() > limits.max_lines;
    lines.truncate(limits.max_lines);
    ShapedOutput { lines, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_dropped_and_lines_trimmed() {
        let shaped = shape_output("  a  \n\n\t\nb\n", OutputLimits::default());
        assert_eq!(shaped.lines, vec!["a", "b"]);
        assert!(!shaped.truncated);
    }

    #[test]
    fn long_lines_wrap_on_char_boundaries() {
        let limits = OutputLimits { max_lines: 10, max_line_len: 3 };
        let shaped = shape_output("ééééééé", limits);
        assert_eq!(shaped.lines, vec!["ééé", "ééé", "é"]);
    }

    #[test]
    fn too_many_lines_are_truncated() {
        let limits = OutputLimits { max_lines: 2, max_line_len: 80 };
        let shaped = shape_output("1\n2\n3\n", limits);
        assert_eq!(shaped.lines, vec!["1", "2"]);
        assert!(shaped.truncated);
    }
}
