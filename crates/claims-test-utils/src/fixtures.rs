//! Upstream response bodies for mock Token Authority and Entitlement Service
//! servers.

use chrono::Utc;
use serde_json::{json, Value};

/// Path the harness configures for token introspection.
pub const INTROSPECTION_PATH: &str = "/oauth2/introspect";

/// Path the harness configures for user info.
pub const USERINFO_PATH: &str = "/oauth2/userinfo";

/// Entitlements path for a subject.
pub fn entitlements_path(subject: &str) -> String {
    format!("/entitlements/{subject}")
}

/// Introspection response for an active token expiring `ttl_seconds` from now.
pub fn active_introspection(subject: &str, ttl_seconds: i64) -> Value {
    json!({
        "active": true,
        "sub": subject,
        "exp": Utc::now().timestamp() + ttl_seconds,
        "scope": "read write",
        "client_id": "web-app",
        "token_type": "Bearer"
    })
}

/// Introspection response for an inactive token.
pub fn inactive_introspection() -> Value {
    json!({ "active": false })
}
