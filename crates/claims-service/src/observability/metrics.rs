//! Metrics definitions for the claims service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `claims_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: success, unauthorized, error
//! - `result`: hit, miss
//! - `upstream`: introspection, userinfo, entitlements
//! - `status`: HTTP status code or "error" for transport failures
//! - `operation`: pipeline step names, fixed in code
//!
//! Tokens, subjects and claim values are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Full resolution: a cache hit is sub-millisecond, a miss is two upstream calls
        .set_buckets_for_metric(
            Matcher::Full("claims_resolution_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set resolution buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("claims_upstream_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set upstream request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Resolution Metrics
// ============================================================================

/// Record a completed claims resolution.
///
/// Metric: `claims_resolutions_total`, `claims_resolution_duration_seconds`
/// Labels: `outcome`
pub fn record_resolution(outcome: &str, duration: Duration) {
    histogram!("claims_resolution_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("claims_resolutions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Record a cache lookup.
///
/// Metric: `claims_cache_lookups_total`
/// Labels: `result` (hit, miss)
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("claims_cache_lookups_total", "result" => result).increment(1);
}

/// Set the number of cache entries, including expired ones not yet reclaimed.
///
/// Metric: `claims_cache_entries`
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(count: usize) {
    gauge!("claims_cache_entries").set(count as f64);
}

// ============================================================================
// Upstream Metrics
// ============================================================================

/// Record a call to the Token Authority or the Entitlement Service.
///
/// Metric: `claims_upstream_requests_total`, `claims_upstream_request_duration_seconds`
/// Labels: `upstream`, `status`
pub fn record_upstream_request(upstream: &str, status: &str, duration: Duration) {
    histogram!("claims_upstream_request_duration_seconds",
        "upstream" => upstream.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("claims_upstream_requests_total",
        "upstream" => upstream.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Performance Metrics
// ============================================================================

/// Record an operation that exceeded its performance threshold.
///
/// Metric: `claims_slow_operations_total`
/// Labels: `operation`
pub fn record_slow_operation(operation: &str) {
    counter!("claims_slow_operations_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}
