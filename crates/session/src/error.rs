//! Error types for session storage

/// Errors from token store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("session file parse error: {0}")]
    Parse(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
