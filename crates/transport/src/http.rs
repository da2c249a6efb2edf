//! reqwest-backed transport
//!
//! Resolves the descriptor's URL against the API base URL, injects configured
//! default headers, attaches the session's bearer token and performs the
//! exchange. Non-success statuses become `TransportError::Status` carrying the
//! backend's error message; the body of a successful response is read fully.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use session::TokenStore;
use tracing::{debug, warn};

use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TransportError};
use crate::response::ApiResponse;
use crate::Transport;

/// Header added to every request (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// HTTP transport for the backend API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    default_headers: Vec<HeaderInjection>,
    timeout: Duration,
    tokens: Arc<dyn TokenStore>,
}

impl HttpTransport {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_headers: Vec::new(),
            timeout,
            tokens,
        }
    }

    pub fn with_default_headers(mut self, headers: Vec<HeaderInjection>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Absolute URLs pass through; paths are appended to the base URL's path.
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        let mut base = Url::parse(&self.base_url).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid base URL {}: {e}", self.base_url))
        })?;
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(url.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid URL {url}: {e}")))
    }

    /// Build the outgoing header set.
    ///
    /// Order: configured defaults, then the descriptor's own headers (which
    /// win), then the bearer token unless the descriptor set Authorization
    /// itself. The token is read at send time so a replay after a refresh
    /// carries the new token.
    async fn build_headers(&self, request: &RequestDescriptor) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        apply_default_headers(&self.default_headers, &mut headers);
        for (name, value) in request.headers() {
            headers.insert(name.clone(), value.clone());
        }

        if !headers.contains_key(AUTHORIZATION)
            && let Some(token) = self.tokens.access_token().await
        {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|e| TransportError::InvalidRequest(format!("invalid token value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    async fn execute(&self, request: &RequestDescriptor) -> Result<ApiResponse> {
        let url = self.resolve_url(request.url())?;
        let headers = self.build_headers(request).await?;

        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| map_reqwest_error(&e, self.timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("reading response body: {e}")))?;

        if !status.is_success() {
            let message = error_message(status, &body);
            debug!(
                request_id = request.id(),
                status = status.as_u16(),
                %message,
                "request returned error status"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Insert configured default headers, skipping invalid entries and refusing
/// to set Authorization (the token store owns that header).
fn apply_default_headers(injections: &[HeaderInjection], headers: &mut HeaderMap) {
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == AUTHORIZATION {
            warn!(header = %injection.name, "refusing to set authorization from config");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}

fn map_reqwest_error(e: &reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(format!("no response after {}s", timeout.as_secs_f64()))
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Extract a human-readable error message from an error response body.
///
/// Looks for `message`, `error.message`, `error` (string) and
/// `error_description` in a JSON body, then falls back to the raw text, then
/// to the status reason phrase.
fn error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let candidates = [
            json.get("message"),
            json.get("error").and_then(|e| e.get("message")),
            json.get("error"),
            json.get("error_description"),
        ];
        if let Some(message) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return message.to_string();
        }
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    if !text.is_empty() {
        return text;
    }
    status
        .canonical_reason()
        .unwrap_or("unknown error")
        .to_string()
}
