//! Error types for the refresh core

use std::time::Duration;

use transport::TransportError;

/// Why a refresh wave failed.
///
/// Cloned verbatim to every waiter of the wave, so it carries only owned,
/// cheap data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token in session")]
    MissingRefreshToken,

    /// The refresh endpoint answered with an error status, e.g. `invalid_grant`.
    #[error("refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("refresh request failed: {0}")]
    Http(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("failed to store refreshed tokens: {0}")]
    Store(String),

    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    /// The refresh exchange ended without producing an outcome (panicked or
    /// was torn down with the runtime).
    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// Errors surfaced to `AuthClient` callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The transport's error, unmodified: exempt endpoints, pass-through
    /// failures, already-retried 401s and failed replays.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The refresh wave this request waited on failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// A replay was attempted with a descriptor that was never marked retried.
    #[error("request {0} replayed without being marked retried")]
    NotMarkedRetried(String),
}

impl ClientError {
    /// HTTP status of the underlying transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Whether the session ended because its refresh failed.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::Refresh(_))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
