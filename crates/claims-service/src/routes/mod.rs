//! HTTP routes for the claims service.
//!
//! Defines the Axum router and application state.

use crate::auth::ClaimsResolver;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{require_claims, AuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Claims resolver shared by every protected route.
    pub resolver: Arc<ClaimsResolver>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/v1/claims` - Resolved claims for the caller - requires a valid token
/// - TraceLayer for request logging
/// - Request timeout from [`Config::request_timeout`]
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let request_timeout = state.config.request_timeout();

    let auth_state = Arc::new(AuthState {
        resolver: Arc::clone(&state.resolver),
    });

    let public_routes = Router::new().route("/health", get(handlers::health_check));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/v1/claims", get(handlers::get_claims))
        .route_layer(middleware::from_fn_with_state(auth_state, require_claims));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}
