//! Claims resolution pipeline.
//!
//! Turns a raw `Authorization` header into [`Claims`]:
//!
//! 1. Extract the bearer token. Anything other than `Bearer <token>` is
//!    denied before any network call.
//! 2. Serve from the [`ClaimsCache`] when a live entry exists.
//! 3. Validate with the Token Authority. An invalid token is a 401.
//! 4. Merge user info claims, when a userinfo source is configured.
//! 5. Fetch product claims from the Entitlement Service.
//! 6. Cache the result until the expiry the authority reported.
//!
//! Upstream calls are strictly sequential and never retried. Faults in steps
//! 3-6 are logged in full and returned to the caller as a 500 carrying only
//! correlation data. Nothing is cached unless every step succeeded.

use crate::auth::authenticator::{TokenAuthenticator, ValidationResult};
use crate::auth::cache::ClaimsCache;
use crate::auth::claims::Claims;
use crate::auth::entitlements::ClaimsEnricher;
use crate::errors::{ClientError, ClientFault, ResolutionError, MISSING_TOKEN_CODE};
use crate::observability::metrics;
use crate::observability::performance::{operations, PerformanceThresholds};
use common::token::{AccessToken, MAX_TOKEN_SIZE_BYTES};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Authorization scheme accepted by [`extract_bearer_token`].
const BEARER_SCHEME: &str = "Bearer";

/// Resolves claims for incoming requests.
///
/// Cheap to share: wrap in an `Arc` and hand to each request.
pub struct ClaimsResolver {
    cache: Arc<ClaimsCache>,
    authenticator: Arc<dyn TokenAuthenticator>,
    enricher: Arc<dyn ClaimsEnricher>,
    service_name: String,
    thresholds: PerformanceThresholds,
}

impl ClaimsResolver {
    pub fn new(
        cache: Arc<ClaimsCache>,
        authenticator: Arc<dyn TokenAuthenticator>,
        enricher: Arc<dyn ClaimsEnricher>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            authenticator,
            enricher,
            service_name: service_name.into(),
            thresholds: PerformanceThresholds::default(),
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn cache(&self) -> &Arc<ClaimsCache> {
        &self.cache
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Resolve the claims for a request's `Authorization` header value.
    ///
    /// Every failure comes back as a [`ClientError`] that is safe to return
    /// to the caller as is.
    #[instrument(skip_all, name = "claims.pipeline.resolve")]
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Claims, ClientError> {
        let start = Instant::now();
        let result = self.try_resolve(authorization).await;
        let elapsed = start.elapsed();
        self.thresholds.check(operations::RESOLVE, elapsed);

        match result {
            Ok(claims) => {
                metrics::record_resolution("success", elapsed);
                Ok(claims)
            }
            Err(failure) => {
                self.log_failure(&failure);
                metrics::record_resolution(
                    match failure {
                        ResolutionError::Client(_) => "unauthorized",
                        ResolutionError::Internal(_) => "error",
                    },
                    elapsed,
                );
                Err(failure.to_client_error(&self.service_name))
            }
        }
    }

    async fn try_resolve(&self, authorization: Option<&str>) -> Result<Claims, ResolutionError> {
        let token = extract_bearer_token(authorization)?;

        if let Some(claims) = self.cache.lookup(&token).await {
            metrics::record_cache_lookup(true);
            return Ok(claims);
        }
        metrics::record_cache_lookup(false);

        let validation = self
            .timed(operations::INTROSPECT, self.authenticator.validate(&token))
            .await?;

        let (mut identity, expires_at) = match validation {
            ValidationResult::Valid {
                identity,
                expires_at,
            } => (identity, expires_at),
            ValidationResult::Invalid { reason } => {
                return Err(ClientError::unauthorized(reason).into());
            }
        };

        if let Some(extra) = self
            .timed(operations::USERINFO, self.authenticator.user_info(&token))
            .await?
        {
            identity.merge(extra);
        }

        let product_claims = self
            .timed(
                operations::ENTITLEMENTS,
                self.enricher.enrich(&identity, &token),
            )
            .await?;

        let claims = Claims::new(identity, product_claims);
        self.cache.store(&token, claims.clone(), expires_at).await;

        debug!(
            target: "claims.auth.pipeline",
            token = %token.fingerprint(),
            "Claims resolved"
        );
        Ok(claims)
    }

    /// Await an upstream call, checking its duration against its threshold.
    async fn timed<T>(&self, operation: &str, call: impl Future<Output = T>) -> T {
        let start = Instant::now();
        let output = call.await;
        self.thresholds.check(operation, start.elapsed());
        output
    }

    fn log_failure(&self, failure: &ResolutionError) {
        match failure {
            ResolutionError::Client(client_error)
                if client_error.error_code() == MISSING_TOKEN_CODE =>
            {
                debug!(
                    target: "claims.auth.pipeline",
                    error = %client_error.to_log_format(),
                    "No usable bearer token"
                );
            }
            ResolutionError::Client(client_error) => {
                info!(
                    target: "claims.auth.pipeline",
                    error = %client_error.to_log_format(),
                    "Token rejected"
                );
            }
            ResolutionError::Internal(api_error) => {
                error!(
                    target: "claims.auth.pipeline",
                    instance_id = api_error.instance_id(),
                    error = %api_error.to_log_format(&self.service_name),
                    "Claims resolution failed"
                );
            }
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// Accepts exactly `Bearer <token>`: two parts separated by a single space,
/// the scheme matched case-sensitively, a non-empty token no larger than
/// [`MAX_TOKEN_SIZE_BYTES`].
///
/// # Errors
///
/// Returns the missing token error for every other shape.
pub fn extract_bearer_token(authorization: Option<&str>) -> Result<AccessToken, ClientError> {
    let Some(header) = authorization else {
        return Err(ClientError::missing_token());
    };

    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER_SCHEME), Some(token), None)
            if !token.is_empty() && token.len() <= MAX_TOKEN_SIZE_BYTES =>
        {
            Ok(AccessToken::new(token))
        }
        _ => Err(ClientError::missing_token()),
    }
}
