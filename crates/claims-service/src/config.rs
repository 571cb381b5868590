//! Claims service configuration.
//!
//! Configuration is loaded from environment variables. The introspection
//! client secret is redacted in Debug output.

use crate::observability::performance::{operations, DEFAULT_THRESHOLD_MS};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default service name, reported as `area` in 500 responses.
pub const DEFAULT_SERVICE_NAME: &str = "claims-service";

/// Default outbound HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Maximum outbound HTTP timeout in seconds.
pub const MAX_HTTP_TIMEOUT_SECONDS: u64 = 60;

/// Upstream calls a cold resolution can make in sequence: introspection,
/// userinfo and entitlements.
pub const MAX_UPSTREAM_CALLS_PER_RESOLUTION: u64 = 3;

/// Headroom on top of the upstream budget for the request timeout.
pub const REQUEST_TIMEOUT_MARGIN_SECONDS: u64 = 5;

/// Default cache sweep interval in seconds.
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Claims service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Name reported as `area` in 500 responses.
    pub service_name: String,

    /// Token Authority RFC 7662 introspection endpoint.
    pub introspection_url: String,

    /// Token Authority userinfo endpoint. User info lookup is off when unset.
    pub userinfo_url: Option<String>,

    /// Client id for introspection requests.
    pub introspection_client_id: String,

    /// Client secret for introspection requests.
    pub introspection_client_secret: SecretString,

    /// Entitlement Service base URL.
    pub entitlement_service_url: String,

    /// Timeout for every outbound HTTP request.
    pub http_timeout_seconds: u64,

    /// Interval between cache sweeps.
    pub cache_sweep_interval_seconds: u64,

    /// Default performance threshold for pipeline operations.
    pub perf_threshold_default_ms: u64,

    /// Per-operation performance thresholds.
    pub perf_threshold_overrides: HashMap<String, u64>,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("service_name", &self.service_name)
            .field("introspection_url", &self.introspection_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("introspection_client_id", &self.introspection_client_id)
            .field("introspection_client_secret", &"[REDACTED]")
            .field("entitlement_service_url", &self.entitlement_service_url)
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .field(
                "cache_sweep_interval_seconds",
                &self.cache_sweep_interval_seconds,
            )
            .field("perf_threshold_default_ms", &self.perf_threshold_default_ms)
            .field("perf_threshold_overrides", &self.perf_threshold_overrides)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),

    #[error("Invalid cache sweep interval configuration: {0}")]
    InvalidSweepInterval(String),

    #[error("Invalid performance threshold configuration: {0}")]
    InvalidPerformanceThreshold(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            vars.get(name)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let introspection_url = required("TOKEN_INTROSPECTION_URL")?;
        let introspection_client_id = required("INTROSPECTION_CLIENT_ID")?;
        let introspection_client_secret =
            SecretString::from(required("INTROSPECTION_CLIENT_SECRET")?);
        let entitlement_service_url = required("ENTITLEMENT_SERVICE_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let service_name = vars
            .get("SERVICE_NAME")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let userinfo_url = vars
            .get("TOKEN_USERINFO_URL")
            .filter(|value| !value.is_empty())
            .cloned();

        // Parse HTTP timeout with validation
        let http_timeout_seconds = if let Some(value_str) = vars.get("HTTP_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidHttpTimeout(format!(
                    "HTTP_TIMEOUT_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 || value > MAX_HTTP_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidHttpTimeout(format!(
                    "HTTP_TIMEOUT_SECONDS must be between 1 and {MAX_HTTP_TIMEOUT_SECONDS}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_HTTP_TIMEOUT_SECONDS
        };

        // Parse cache sweep interval with validation
        let cache_sweep_interval_seconds =
            if let Some(value_str) = vars.get("CACHE_SWEEP_INTERVAL_SECONDS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidSweepInterval(format!(
                        "CACHE_SWEEP_INTERVAL_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidSweepInterval(
                        "CACHE_SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
                    ));
                }

                value
            } else {
                DEFAULT_CACHE_SWEEP_INTERVAL_SECONDS
            };

        let perf_threshold_default_ms = match vars.get("PERF_THRESHOLD_DEFAULT_MS") {
            Some(value_str) => parse_threshold_ms("PERF_THRESHOLD_DEFAULT_MS", value_str)?,
            None => DEFAULT_THRESHOLD_MS,
        };

        let perf_threshold_overrides = match vars.get("PERF_THRESHOLD_OVERRIDES") {
            Some(value_str) => parse_threshold_overrides(value_str)?,
            None => HashMap::new(),
        };

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("" | "text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidLogFormat(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        Ok(Config {
            bind_address,
            service_name,
            introspection_url,
            userinfo_url,
            introspection_client_id,
            introspection_client_secret,
            entitlement_service_url,
            http_timeout_seconds,
            cache_sweep_interval_seconds,
            perf_threshold_default_ms,
            perf_threshold_overrides,
            log_format,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Timeout for a whole inbound request.
    ///
    /// Always longer than the worst case of sequential upstream timeouts, so
    /// a slow upstream surfaces as a 500 from the pipeline and never as a
    /// bare 408 from the router.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http_timeout_seconds * MAX_UPSTREAM_CALLS_PER_RESOLUTION
                + REQUEST_TIMEOUT_MARGIN_SECONDS,
        )
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_seconds)
    }
}

fn parse_threshold_ms(name: &str, value_str: &str) -> Result<u64, ConfigError> {
    value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidPerformanceThreshold(format!(
            "{name} must be a non-negative integer of milliseconds, got '{value_str}': {e}"
        ))
    })
}

/// Parse `operation=ms` pairs separated by commas. Blank entries are ignored.
fn parse_threshold_overrides(value_str: &str) -> Result<HashMap<String, u64>, ConfigError> {
    let mut overrides = HashMap::new();

    for entry in value_str.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (operation, ms) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidPerformanceThreshold(format!(
                "PERF_THRESHOLD_OVERRIDES entries must be 'operation=ms', got '{entry}'"
            ))
        })?;

        let operation = operation.trim();
        if operation.is_empty() {
            return Err(ConfigError::InvalidPerformanceThreshold(format!(
                "PERF_THRESHOLD_OVERRIDES entry has an empty operation name: '{entry}'"
            )));
        }

        if !operations::ALL.iter().any(|known| *known == operation) {
            return Err(ConfigError::InvalidPerformanceThreshold(format!(
                "PERF_THRESHOLD_OVERRIDES operation must be one of {}, got '{operation}'",
                operations::ALL.join(", ")
            )));
        }

        let ms = parse_threshold_ms(operation, ms)?;
        overrides.insert(operation.to_string(), ms);
    }

    Ok(overrides)
}
