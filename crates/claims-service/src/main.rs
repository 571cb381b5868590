//! Claims Service
//!
//! HTTP service that resolves bearer tokens into claims for protected routes.

use claims_service::auth::{
    start_cache_sweeper, ClaimsCache, ClaimsResolver, EntitlementClient, IntrospectionClient,
};
use claims_service::config::{Config, LogFormat};
use claims_service::observability::metrics::init_metrics_recorder;
use claims_service::observability::performance::PerformanceThresholds;
use claims_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "claims_service=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is read before logging so LOG_FORMAT can pick the layer
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = matches!(&config, Ok(c) if c.log_format == LogFormat::Json);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Claims Service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        service_name = %config.service_name,
        bind_address = %config.bind_address,
        userinfo_enabled = config.userinfo_url.is_some(),
        http_timeout_seconds = config.http_timeout_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let authenticator = IntrospectionClient::new(
        config.introspection_url.clone(),
        config.userinfo_url.clone(),
        config.introspection_client_id.clone(),
        config.introspection_client_secret.clone(),
        config.http_timeout(),
    )
    .map_err(|e| {
        error!("Failed to create introspection client: {}", e);
        e
    })?;

    let enricher = EntitlementClient::new(&config.entitlement_service_url, config.http_timeout())
        .map_err(|e| {
            error!("Failed to create entitlement client: {}", e);
            e
        })?;

    let cache = Arc::new(ClaimsCache::new());
    let thresholds = PerformanceThresholds::new(
        config.perf_threshold_default_ms,
        config.perf_threshold_overrides.clone(),
    );
    let resolver = ClaimsResolver::new(
        Arc::clone(&cache),
        Arc::new(authenticator),
        Arc::new(enricher),
        config.service_name.clone(),
    )
    .with_thresholds(thresholds);

    let cancel_token = CancellationToken::new();
    let sweeper_handle = tokio::spawn(start_cache_sweeper(
        Arc::clone(&cache),
        config.cache_sweep_interval(),
        cancel_token.child_token(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        config,
        resolver: Arc::new(resolver),
    });
    let app = routes::build_routes(state, metrics_handle);

    info!("Claims Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Stop the sweeper if the server exited for any other reason
    cancel_token.cancel();
    if let Err(e) = sweeper_handle.await {
        error!("Cache sweeper task failed: {}", e);
    }

    info!("Claims Service shutdown complete");

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then cancel background tasks.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    cancel_token.cancel();
}
