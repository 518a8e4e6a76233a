//! evald transport layer
//!
//! Provides the Unix socket listener and client for the evald wire protocol.
//! The transport layer handles:
//! - Endpoint setup (stale socket removal, bind, permissions)
//! - Admission control (bounded concurrent connections)
//! - Frame reading and writing, framing-error isolation per connection
//!
//! The transport is decoupled from evaluation via the `RequestHandler` trait.

pub mod client;
pub mod error;
pub mod server;

pub use client::{EvalClient, OutputLimits, ShapedOutput, shape_output};
pub use error::{HandlerError, TransportError};
pub use server::{RequestHandler, TransportConfig, TransportServer, read_request, write_response};
