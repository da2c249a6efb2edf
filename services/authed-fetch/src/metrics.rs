//! Prometheus recorder for the refresh core's metrics
//!
//! The refresh core emits through the `metrics` facade
//! (see `auth_refresh::metrics`); this installs the recorder that collects
//! them so `--metrics` can print a text exposition snapshot on exit.

use auth_refresh::metrics::WAVE_WAITERS;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Callers released per wave; a single-flight wave normally releases a handful.
const WAITER_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(WAVE_WAITERS.to_string()), WAITER_BUCKETS)
}

/// Install the Prometheus recorder globally and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
