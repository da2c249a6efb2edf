//! Refresh endpoint
//!
//! The zero-argument exchange the coordinator runs once per wave. On success
//! subsequent transport calls carry valid credentials; on failure the error is
//! handed verbatim to every waiter of the wave.
//!
//! `HttpRefreshEndpoint` posts the stored refresh token to the backend's
//! refresh URL with its own reqwest client, so the exchange never passes
//! through `AuthClient` and can never recurse into another refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use session::{SessionTokens, TokenStore, now_millis};
use tracing::{debug, info, warn};

use crate::error::RefreshError;

/// The refresh exchange.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn RefreshEndpoint>`).
pub trait RefreshEndpoint: Send + Sync {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), RefreshError>> + Send + '_>>;
}

/// Successful response from the refresh URL.
///
/// `expires_in` is a delta in seconds from the response time. Backends that
/// rotate refresh tokens return a new `refresh_token`; others omit it and the
/// stored one is kept.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Build the new session, keeping `previous_refresh` when the backend
    /// did not rotate the refresh token.
    pub fn into_session(self, previous_refresh: Option<String>, now: u64) -> SessionTokens {
        let mut tokens = SessionTokens::new(self.access_token);
        if let Some(refresh) = self.refresh_token.or(previous_refresh) {
            tokens = tokens.with_refresh(refresh);
        }
        if let Some(expires_in) = self.expires_in {
            tokens = tokens.with_expires_at(now.saturating_add(expires_in.saturating_mul(1000)));
        }
        tokens
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Refresh endpoint reached over HTTP.
pub struct HttpRefreshEndpoint {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenStore>,
}

impl HttpRefreshEndpoint {
    pub fn new(client: reqwest::Client, url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            client,
            url: url.into(),
            tokens,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn exchange(&self) -> Result<(), RefreshError> {
        let refresh = self
            .tokens
            .refresh_token()
            .await
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest {
                refresh_token: refresh.expose(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let message = oauth_error(&body);
            warn!(status = status.as_u16(), %message, "refresh endpoint rejected refresh");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        let rotated = token_response.refresh_token.is_some();
        let session = token_response.into_session(Some(refresh.expose().clone()), now_millis());
        self.tokens
            .store(session)
            .await
            .map_err(|e| RefreshError::Store(e.to_string()))?;

        debug!(rotated, "stored refreshed session");
        info!("token refresh succeeded");
        Ok(())
    }
}

impl RefreshEndpoint for HttpRefreshEndpoint {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), RefreshError>> + Send + '_>> {
        Box::pin(self.exchange())
    }
}

/// Message for a rejected refresh: the OAuth `error` code with its
/// `error_description` when present, otherwise `message`, otherwise the raw body.
fn oauth_error(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let code = json.get("error").and_then(|v| v.as_str());
        let description = json.get("error_description").and_then(|v| v.as_str());
        match (code, description) {
            (Some(code), Some(description)) => return format!("{code}: {description}"),
            (Some(code), None) => return code.to_string(),
            _ => {}
        }
        if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::from("<no body>")
    } else {
        trimmed.to_string()
    }
}
