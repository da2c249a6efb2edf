//! Transport error contract
//!
//! Every failed exchange is reported with the HTTP status when one was
//! received, and a message otherwise passed through verbatim. The refresh core
//! only distinguishes 401 from everything else.

/// Status code the refresh core treats as an expired credential.
pub const UNAUTHORIZED: u16 = 401;

/// A failed request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// No response within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (DNS, refused, reset, body read).
    #[error("request failed: {0}")]
    Network(String),

    /// The descriptor could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::Status { message, .. }
            | TransportError::Timeout(message)
            | TransportError::Network(message)
            | TransportError::InvalidRequest(message) => message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(UNAUTHORIZED)
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
