//! Framing errors shared by both wire formats.

use thiserror::Error;

/// A malformed, truncated, or oversized frame.
///
/// Framing errors are per-connection: the offending connection is closed
/// without a response, and nothing else is affected.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame body of {len} bytes exceeds limit of {limit} bytes")]
    TooLarge { len: usize, limit: usize },

    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),

    #[error("unexpected {0:?} frame")]
    UnexpectedTag(crate::worker::FrameTag),

    #[error("malformed message payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
