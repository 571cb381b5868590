//! Liveness probe.

/// Returns "OK" while the process is running. Does not check upstreams.
pub async fn health_check() -> &'static str {
    "OK"
}
