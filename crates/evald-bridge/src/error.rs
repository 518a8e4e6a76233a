//! Bridge error types.

use std::path::PathBuf;

use evald_protocol::FramingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker hung up, broke framing, or was killed. Terminal for the bridge.
    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
