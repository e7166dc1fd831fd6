//! Store error types

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database driver failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data could not be interpreted
    #[error("corrupt data: {0}")]
    Corrupt(String),
}
