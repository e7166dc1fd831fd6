//! Per-connection session types

pub mod handle;
pub mod state;

pub use handle::{ConnectionHandle, ConnectionId};
pub use state::{AuthPhase, SessionState};
