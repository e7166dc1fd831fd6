//! Crate-level error type

use crate::store::StoreError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a connection or prevent the server from starting
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket read/write/accept failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence layer failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Peer sent bytes that are not valid UTF-8
    #[error("peer sent invalid UTF-8")]
    InvalidUtf8,

    /// Peer sent a line longer than the configured maximum
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error simply means the peer went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
