//! Broadcast engine
//!
//! Resolves the live target set for a line (one room, or everyone) from the
//! [`SessionRegistry`](crate::registry::SessionRegistry) and writes it to each
//! target. Failed targets are reported back so the hub can run their
//! disconnect cleanup.

pub mod engine;

pub use engine::{BroadcastEngine, Delivery, Scope};
