//! Session credentials
//!
//! `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
//! computed when the token endpoint's `expires_in` seconds are received.

use common::Secret;
use serde::{Deserialize, Serialize};

/// Access/refresh token pair for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Bearer token attached to API requests
    pub access: Secret<String>,
    /// Token exchanged at the refresh endpoint; absent for access-only sessions
    pub refresh: Option<Secret<String>>,
    /// Expiration as unix timestamp in milliseconds, when the backend reported one
    pub expires_at: Option<u64>,
}

impl SessionTokens {
    pub fn new(access: impl Into<Secret<String>>) -> Self {
        Self {
            access: access.into(),
            refresh: None,
            expires_at: None,
        }
    }

    pub fn with_refresh(mut self, refresh: impl Into<Secret<String>>) -> Self {
        self.refresh = Some(refresh.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the access token is past its recorded expiry at `now` (ms).
    /// Sessions without a recorded expiry are never considered expired here;
    /// the backend's 401 is the authority.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// On-disk shape of a session. Kept separate from `SessionTokens` so the
/// secret wrapper never needs to be serializable.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredTokens {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl From<&SessionTokens> for StoredTokens {
    fn from(tokens: &SessionTokens) -> Self {
        Self {
            access: tokens.access.expose().clone(),
            refresh: tokens.refresh.as_ref().map(|r| r.expose().clone()),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<StoredTokens> for SessionTokens {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access: Secret::new(stored.access),
            refresh: stored.refresh.map(Secret::new),
            expires_at: stored.expires_at,
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
