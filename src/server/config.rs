//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default listening port
pub const DEFAULT_PORT: u16 = 8888;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Idle limit for each line read before login completes
    pub auth_timeout: Duration,

    /// Number of messages returned by `/history`
    pub history_limit: usize,

    /// Longest inbound line accepted, in bytes; longer lines end the connection
    pub max_line_length: usize,

    /// SQLite database URL
    pub database_url: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            auth_timeout: Duration::from_secs(30),
            history_limit: 50,
            max_line_length: 64 * 1024,
            database_url: "sqlite://spacecat.db".to_owned(),
            tcp_nodelay: true, // Chat lines are small and latency-sensitive
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the login idle timeout
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the `/history` length
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the inbound line limit
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Set the database URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Disable TCP_NODELAY
    pub fn disable_nodelay(mut self) -> Self {
        self.tcp_nodelay = false;
        self
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth_timeout.is_zero() {
            return Err(Error::Config("auth_timeout must be non-zero".into()));
        }
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".into()));
        }
        if self.max_line_length == 0 {
            return Err(Error::Config("max_line_length must be at least 1".into()));
        }
        if self.database_url.is_empty() {
            return Err(Error::Config("database_url is empty".into()));
        }
        Ok(())
    }
}
