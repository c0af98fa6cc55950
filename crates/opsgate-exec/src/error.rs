//! Error types for opsgate-exec.

use thiserror::Error;

/// Execution error type
#[derive(Debug, Error)]
pub enum Error {
    /// The submitted command line was empty or unparsable
    #[error("invalid command line: {0}")]
    InvalidCommand(String),

    /// Metrics sampling failure
    #[error("metrics sampling failed: {0}")]
    Sampling(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
