//! Transport error types.

use std::path::PathBuf;

use evald_protocol::FramingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Infrastructure failure while handling a request.
///
/// The protocol has no error frame, so the connection is closed without a
/// response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
