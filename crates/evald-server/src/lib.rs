//! evald server — session registry and execution supervisor.
//!
//! The server owns every evaluation context (through [`SessionRegistry`]),
//! bounds each evaluation with [`Supervisor`], and provides the
//! `RequestHandler` implementation ([`EvalServer`]) for the transport layer.

pub mod registry;
pub mod router;
pub mod supervisor;

pub use registry::{Session, SessionRegistry, SessionState};
pub use router::EvalServer;
pub use supervisor::{Supervisor, SupervisorConfig};
