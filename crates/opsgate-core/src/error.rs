//! Error types for opsgate-core.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// History store failure (SQLite)
    #[error("history store error: {0}")]
    History(#[from] sqlx::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
