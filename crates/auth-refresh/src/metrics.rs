//! Refresh core metrics
//!
//! Emitted through the `metrics` facade; a binary decides whether to install
//! a recorder. Without one, every call here is a no-op.
//!
//! - `auth_refresh_waves_total` (counter): label `outcome` (`success` / `failure`)
//! - `auth_refresh_waiters` (histogram): callers released per wave
//! - `auth_requests_retried_total` (counter): label `outcome`
//! - `auth_escalations_total` (counter)
//! - `auth_failures_total` (counter): label `kind`

use crate::classify::FailureKind;

pub const WAVES_TOTAL: &str = "auth_refresh_waves_total";
pub const WAVE_WAITERS: &str = "auth_refresh_waiters";
pub const RETRIES_TOTAL: &str = "auth_requests_retried_total";
pub const ESCALATIONS_TOTAL: &str = "auth_escalations_total";
pub const FAILURES_TOTAL: &str = "auth_failures_total";

fn outcome_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Record a resolved refresh wave and how many callers it released.
pub fn record_wave(success: bool, waiters: usize) {
    metrics::counter!(WAVES_TOTAL, "outcome" => outcome_label(success)).increment(1);
    metrics::histogram!(WAVE_WAITERS).record(waiters as f64);
}

/// Record the outcome of a replayed request.
pub fn record_retry(success: bool) {
    metrics::counter!(RETRIES_TOTAL, "outcome" => outcome_label(success)).increment(1);
}

pub fn record_escalation() {
    metrics::counter!(ESCALATIONS_TOTAL).increment(1);
}

/// Record a failed exchange by taxonomy kind.
pub fn record_failure(kind: FailureKind) {
    metrics::counter!(FAILURES_TOTAL, "kind" => kind.label()).increment(1);
}
