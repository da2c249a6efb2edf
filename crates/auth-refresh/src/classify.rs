//! Failure classification
//!
//! Decides what a failed exchange means for the refresh core. Requests to the
//! authentication endpoints themselves are never refreshed (a 401 from
//! `/auth/refresh` must not trigger another refresh), and a request that was
//! already replayed once is never replayed again.

use transport::{RequestDescriptor, TransportError, UNAUTHORIZED};

/// Default authentication endpoints exempt from refresh handling.
pub const DEFAULT_AUTH_ENDPOINTS: &[&str] = &["/auth/login", "/auth/register", "/auth/refresh"];

/// What the client does with a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 401 on a non-exempt request not yet retried: join the refresh wave
    RefreshEligible,
    /// Failure on an authentication endpoint: surface unchanged
    AuthEndpointExempt,
    /// Anything else: surface unchanged
    PassThrough,
}

/// Failure taxonomy for logs and metrics. Finer than `Classification`:
/// it separates already-retried 401s from other pass-through failures and
/// names refresh failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AuthEndpointExempt,
    RefreshEligibleUnretried,
    AlreadyRetried,
    RefreshFailure,
    PassThrough,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::AuthEndpointExempt => "auth_endpoint_exempt",
            FailureKind::RefreshEligibleUnretried => "refresh_eligible",
            FailureKind::AlreadyRetried => "already_retried",
            FailureKind::RefreshFailure => "refresh_failure",
            FailureKind::PassThrough => "pass_through",
        }
    }
}

/// Configured set of authentication endpoint path patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    patterns: Vec<String>,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_ENDPOINTS.iter().copied())
    }
}

impl AuthEndpoints {
    /// Patterns are normalized to a leading `/` and no trailing `/`; empty
    /// patterns are dropped.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| {
                let trimmed = p.as_ref().trim().trim_end_matches('/');
                if trimmed.is_empty() {
                    None
                } else if trimmed.starts_with('/') {
                    Some(trimmed.to_string())
                } else {
                    Some(format!("/{trimmed}"))
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `path` targets an authentication endpoint.
    ///
    /// A pattern matches when the path ends with it or contains it followed
    /// by `/`. This tolerates an API prefix (`/api/auth/login`) without
    /// treating `/auth/login-history` as exempt.
    pub fn is_exempt(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.patterns
            .iter()
            .any(|p| path.ends_with(p.as_str()) || path.contains(&format!("{p}/")))
    }
}

/// Classify a failed exchange for `request`. Pure; rules apply in order:
/// exempt endpoint, then unretried 401, then pass-through.
pub fn classify(
    request: &RequestDescriptor,
    status: Option<u16>,
    endpoints: &AuthEndpoints,
) -> Classification {
    if endpoints.is_exempt(&request.path()) {
        Classification::AuthEndpointExempt
    } else if status == Some(UNAUTHORIZED) && !request.is_retried() {
        Classification::RefreshEligible
    } else {
        Classification::PassThrough
    }
}

/// Taxonomy label for a transport failure on `request`.
pub fn failure_kind(
    request: &RequestDescriptor,
    error: &TransportError,
    endpoints: &AuthEndpoints,
) -> FailureKind {
    match classify(request, error.status(), endpoints) {
        Classification::AuthEndpointExempt => FailureKind::AuthEndpointExempt,
        Classification::RefreshEligible => FailureKind::RefreshEligibleUnretried,
        Classification::PassThrough if error.is_unauthorized() => FailureKind::AlreadyRetried,
        Classification::PassThrough => FailureKind::PassThrough,
    }
}
