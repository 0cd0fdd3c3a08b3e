//! Prometheus metrics exposition
//!
//! - `auth_requests_total` (counter): labels `status`, `method`
//! - `auth_request_duration_seconds` (histogram): label `status`
//! - `cmdr_cache_lookups_total` (counter): labels `resource`, `outcome`
//! - `cmdr_upstream_errors_total` (counter): label `error_type`
//!
//! `token_refresh_total` is emitted by the refresh scheduler and rendered by
//! the same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "auth_request_duration_seconds";

/// Bucket boundaries from 5ms to 30s. Upstream calls dominate the tail.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("auth_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}

/// Record a cache lookup for a resource (`hit` or `miss`).
pub fn record_cache_lookup(resource: &str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("cmdr_cache_lookups_total", "resource" => resource.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record an upstream failure with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("cmdr_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}
