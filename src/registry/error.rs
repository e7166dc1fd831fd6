//! Registry error types

/// Error type for session registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Username already has a live session
    #[error("username already online: {0}")]
    UsernameTaken(String),

    /// Username has no live session
    #[error("user not online: {0}")]
    NotOnline(String),
}
