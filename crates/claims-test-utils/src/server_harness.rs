//! Test server harness for E2E testing
//!
//! Provides `TestClaimsServer` for spawning real claims service instances in
//! tests, wired to real HTTP clients that point at caller-provided upstreams
//! (typically `wiremock` servers).

use crate::fixtures::INTROSPECTION_PATH;
use claims_service::auth::{ClaimsCache, ClaimsResolver, EntitlementClient, IntrospectionClient};
use claims_service::config::Config;
use claims_service::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Client id the harness configures for introspection.
pub const TEST_CLIENT_ID: &str = "claims-service-test";

/// Client secret the harness configures for introspection.
pub const TEST_CLIENT_SECRET: &str = "claims-service-test-secret";

/// Configuration variables pointing at the given upstream base URLs.
pub fn test_vars(authority_url: &str, entitlements_url: &str) -> HashMap<String, String> {
    HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SERVICE_NAME".to_string(), "claims-service-test".to_string()),
        (
            "TOKEN_INTROSPECTION_URL".to_string(),
            format!("{authority_url}{INTROSPECTION_PATH}"),
        ),
        ("INTROSPECTION_CLIENT_ID".to_string(), TEST_CLIENT_ID.to_string()),
        (
            "INTROSPECTION_CLIENT_SECRET".to_string(),
            TEST_CLIENT_SECRET.to_string(),
        ),
        (
            "ENTITLEMENT_SERVICE_URL".to_string(),
            entitlements_url.to_string(),
        ),
        ("HTTP_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ])
}

/// Test harness for spawning the claims service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestClaimsServer::spawn(&authority.uri(), &entitlements.uri()).await?;
///
/// let response = reqwest::Client::new()
///     .get(format!("{}/v1/claims", server.url()))
///     .bearer_auth("abc123")
///     .send()
///     .await?;
/// ```
pub struct TestClaimsServer {
    addr: SocketAddr,
    config: Config,
    cache: Arc<ClaimsCache>,
    _handle: JoinHandle<()>,
}

impl TestClaimsServer {
    /// Spawn a server using [`test_vars`] for the given upstreams.
    pub async fn spawn(authority_url: &str, entitlements_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(test_vars(authority_url, entitlements_url)).await
    }

    /// Spawn a server from explicit configuration variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let authenticator = IntrospectionClient::new(
            config.introspection_url.clone(),
            config.userinfo_url.clone(),
            config.introspection_client_id.clone(),
            config.introspection_client_secret.clone(),
            config.http_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create introspection client: {}", e))?;

        let enricher =
            EntitlementClient::new(&config.entitlement_service_url, config.http_timeout())
                .map_err(|e| anyhow::anyhow!("Failed to create entitlement client: {}", e))?;

        let cache = Arc::new(ClaimsCache::new());
        let resolver = ClaimsResolver::new(
            Arc::clone(&cache),
            Arc::new(authenticator),
            Arc::new(enricher),
            config.service_name.clone(),
        );

        let state = Arc::new(AppState {
            config: config.clone(),
            resolver: Arc::new(resolver),
        });

        // Standalone recorder: never installed globally, so every test can
        // create its own.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            cache,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The server's claims cache.
    pub fn cache(&self) -> &Arc<ClaimsCache> {
        &self.cache
    }
}

impl Drop for TestClaimsServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
