//! evald protocol types.
//!
//! Two framings live here:
//! - the client-facing wire format (fixed little-endian header, UTF-8 body),
//!   see [`wire`];
//! - the tagged, JSON-payload frames exchanged between the isolation front end
//!   and its worker process, see [`worker`].
//!
//! This crate is the single source of truth for both layouts.

pub mod error;
pub mod wire;
pub mod worker;

pub use error::FramingError;
pub use wire::{
    EvalRequest, EvalResponse, RequestHeader,
    decode_request, decode_response, encode_request, encode_response,
    DEFAULT_MAX_FRAME_BYTES, HEADER_LEN, TIMEOUT_SENTINEL,
};
pub use worker::{FrameHeader, FrameTag, WorkerRequest, WorkerResponse};
