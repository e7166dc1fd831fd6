//! Chat server
//!
//! The listener accepts TCP connections and spawns a supervisor per
//! connection. Supervisors share one [`Hub`] holding the session registry,
//! the broadcast engine and the store.

pub mod config;
pub mod connection;
mod dispatcher;
pub mod hub;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use hub::Hub;
pub use listener::ChatServer;
