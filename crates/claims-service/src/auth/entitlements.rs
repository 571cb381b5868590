//! Product claims from the Entitlement Service.
//!
//! [`ClaimsEnricher`] is the seam the pipeline depends on;
//! [`EntitlementClient`] implements it with a GET to
//! `{base}/entitlements/{subject}`, forwarding the caller's bearer token.
//! The response body is a JSON object whose members become the product
//! claims.
//!
//! Every failure here is an internal fault. The token was already validated,
//! so an error from the Entitlement Service never turns into a 401.

use crate::auth::claims::{ClaimMap, IdentityClaims};
use crate::errors::{codes, ApiError};
use crate::observability::metrics;
use common::token::AccessToken;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Product claims lookup (enables mocking).
#[async_trait::async_trait]
pub trait ClaimsEnricher: Send + Sync {
    /// Fetch product claims for a validated identity.
    async fn enrich(
        &self,
        identity: &IdentityClaims,
        token: &AccessToken,
    ) -> Result<ClaimMap, ApiError>;
}

/// HTTP client for the Entitlement Service.
#[derive(Clone)]
pub struct EntitlementClient {
    client: Client,
    base_url: Url,
}

impl EntitlementClient {
    /// Create a new entitlement client.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` if `base_url` is not an absolute URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ApiError::new(codes::SERVER_ERROR, "Invalid Entitlement Service URL").with_source(&e)
        })?;

        if base_url.cannot_be_a_base() {
            return Err(
                ApiError::new(codes::SERVER_ERROR, "Invalid Entitlement Service URL")
                    .with_details(format!("{base_url} cannot be a base URL")),
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                ApiError::new(codes::SERVER_ERROR, "Failed to build HTTP client").with_source(&e)
            })?;

        Ok(Self { client, base_url })
    }

    /// `{base}/entitlements/{subject}`, with the subject percent-encoded as a
    /// single path segment.
    fn entitlements_url(&self, subject: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("entitlements").push(subject);
        }
        url
    }
}

#[async_trait::async_trait]
impl ClaimsEnricher for EntitlementClient {
    #[instrument(skip_all, fields(token = %token.fingerprint()))]
    async fn enrich(
        &self,
        identity: &IdentityClaims,
        token: &AccessToken,
    ) -> Result<ClaimMap, ApiError> {
        let url = self.entitlements_url(&identity.subject);
        let start = Instant::now();

        let result = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .header("Accept", "application/json")
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_request("entitlements", "error", start.elapsed());
                debug!(target: "claims.auth.entitlements", "Entitlement request failed");
                return Err(
                    ApiError::new(codes::ENTITLEMENT_FAILURE, "Entitlement lookup failed")
                        .with_details("Entitlement Service request failed")
                        .with_source(&e),
                );
            }
        };

        let status = response.status();
        metrics::record_upstream_request("entitlements", status.as_str(), start.elapsed());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(target: "claims.auth.entitlements", status = status.as_u16(), "Entitlement Service returned error");
            return Err(
                ApiError::new(codes::ENTITLEMENT_FAILURE, "Entitlement lookup failed")
                    .with_details(format!("Entitlement Service returned {status}: {body}")),
            );
        }

        let claims: ClaimMap = response.json().await.map_err(|e| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "Entitlement lookup failed")
                .with_details("Entitlement response is not a JSON object")
                .with_source(&e)
        })?;

        debug!(
            target: "claims.auth.entitlements",
            claim_count = claims.len(),
            "Product claims retrieved"
        );
        Ok(claims)
    }
}

/// Mock Entitlement Service for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// In-process enricher with call counting.
    pub struct MockEntitlements {
        claims: Option<ClaimMap>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        subjects: Mutex<Vec<String>>,
    }

    impl MockEntitlements {
        /// Return `claims` for every identity.
        pub fn returning(claims: ClaimMap) -> Self {
            Self {
                claims: Some(claims),
                delay: None,
                calls: AtomicUsize::new(0),
                subjects: Mutex::new(Vec::new()),
            }
        }

        /// Fail every call as if the service were down.
        pub fn failing() -> Self {
            Self {
                claims: None,
                delay: None,
                calls: AtomicUsize::new(0),
                subjects: Mutex::new(Vec::new()),
            }
        }

        /// Answer only after `delay`, like a slow upstream.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Subjects passed to `enrich`, in call order.
        pub async fn subjects(&self) -> Vec<String> {
            self.subjects.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl ClaimsEnricher for MockEntitlements {
        async fn enrich(
            &self,
            identity: &IdentityClaims,
            _token: &AccessToken,
        ) -> Result<ClaimMap, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().await.push(identity.subject.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.claims.clone().ok_or_else(|| {
                ApiError::new(codes::ENTITLEMENT_FAILURE, "Entitlement lookup failed")
                    .with_details("Mock Entitlement Service failure")
            })
        }
    }
}
