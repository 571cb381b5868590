//! Performance thresholds for pipeline operations.
//!
//! Each operation has a threshold in milliseconds: the configured default, or
//! a per-operation override. An operation that takes longer than its
//! threshold is logged at `warn` and counted in `claims_slow_operations_total`.

use crate::observability::metrics;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Default threshold when none is configured.
pub const DEFAULT_THRESHOLD_MS: u64 = 1000;

/// Operation names that thresholds can be set for.
pub mod operations {
    /// A complete resolution, cache hit or miss.
    pub const RESOLVE: &str = "resolve";

    /// Token Authority introspection call.
    pub const INTROSPECT: &str = "introspect";

    /// Token Authority userinfo call.
    pub const USERINFO: &str = "userinfo";

    /// Entitlement Service call.
    pub const ENTITLEMENTS: &str = "entitlements";

    /// Names accepted in `PERF_THRESHOLD_OVERRIDES`.
    pub const ALL: [&str; 4] = [RESOLVE, INTROSPECT, USERINFO, ENTITLEMENTS];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceThresholds {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_MS, HashMap::new())
    }
}

impl PerformanceThresholds {
    pub fn new(default_ms: u64, overrides_ms: HashMap<String, u64>) -> Self {
        Self {
            default: Duration::from_millis(default_ms),
            overrides: overrides_ms
                .into_iter()
                .map(|(operation, ms)| (operation, Duration::from_millis(ms)))
                .collect(),
        }
    }

    /// Threshold for an operation, falling back to the default.
    pub fn threshold_for(&self, operation: &str) -> Duration {
        self.overrides
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }

    /// Check an elapsed time against the operation's threshold.
    ///
    /// Returns `true` (and logs) when the threshold was exceeded.
    pub fn check(&self, operation: &str, elapsed: Duration) -> bool {
        let threshold = self.threshold_for(operation);
        if elapsed <= threshold {
            return false;
        }

        metrics::record_slow_operation(operation);
        warn!(
            target: "claims.performance",
            operation,
            elapsed_ms = elapsed.as_millis(),
            threshold_ms = threshold.as_millis(),
            "Operation exceeded performance threshold"
        );
        true
    }
}
