//! Claims middleware for protected routes.
//!
//! Runs the claims resolution pipeline on the request's `Authorization`
//! header and injects the resolved [`Claims`](crate::auth::Claims) into request extensions.
//! Requests that fail resolution never reach the handler.

use crate::auth::ClaimsResolver;
use crate::errors::ClientError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the claims middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Shared resolver (cache plus upstream clients).
    pub resolver: Arc<ClaimsResolver>,
}

/// Middleware that resolves claims for every request.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 with `WWW-Authenticate` if the token is missing, malformed, invalid or expired
/// - 500 with correlation fields if an upstream service failed
/// - Otherwise continues to the next handler with claims in extensions
#[instrument(skip_all, name = "claims.middleware.auth")]
pub async fn require_claims(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ClientError> {
    // A non-ASCII value is passed on as an empty header, which the resolver
    // rejects and records like any other malformed header
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());

    let claims = state.resolver.resolve(authorization).await?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::authenticator::mock::MockTokenAuthority;
    use crate::auth::entitlements::mock::MockEntitlements;
    use crate::auth::{Claims, ClaimMap, ClaimsCache, ClaimsEnricher, TokenAuthenticator};
    use crate::errors::{MISSING_TOKEN_CODE, UNAUTHORIZED_CODE};
    use axum::{
        body::Body,
        http::{HeaderValue, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(authority: Arc<MockTokenAuthority>, entitlements: Arc<MockEntitlements>) -> Router {
        let resolver = ClaimsResolver::new(
            Arc::new(ClaimsCache::new()),
            authority as Arc<dyn TokenAuthenticator>,
            entitlements as Arc<dyn ClaimsEnricher>,
            "claims-service",
        );
        let auth_state = Arc::new(AuthState {
            resolver: Arc::new(resolver),
        });

        Router::new()
            .route(
                "/protected",
                get(|Extension(claims): Extension<Claims>| async move {
                    claims.subject().to_string()
                }),
            )
            .route_layer(middleware::from_fn_with_state(auth_state, require_claims))
    }

    fn gold() -> Arc<MockEntitlements> {
        let claims: ClaimMap = serde_json::from_value(json!({"plan": "gold"})).unwrap();
        Arc::new(MockEntitlements::returning(claims))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler_with_claims() {
        let authority = Arc::new(MockTokenAuthority::accepting(
            "u1",
            Utc::now() + ChronoDuration::hours(1),
        ));
        let app = app(Arc::clone(&authority), gold());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Bearer abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"u1");
    }

    #[tokio::test]
    async fn test_missing_header_is_401_without_upstream_calls() {
        let authority = Arc::new(MockTokenAuthority::accepting(
            "u1",
            Utc::now() + ChronoDuration::hours(1),
        ));
        let app = app(Arc::clone(&authority), gold());

        let response = app
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
        assert_eq!(body_json(response).await["code"], MISSING_TOKEN_CODE);
        assert_eq!(authority.validate_calls(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_non_ascii_header_is_missing_token() {
        let authority = Arc::new(MockTokenAuthority::accepting(
            "u1",
            Utc::now() + ChronoDuration::hours(1),
        ));
        let app = app(Arc::clone(&authority), gold());

        let mut request = Request::builder().uri("/protected").body(Body::empty()).unwrap();
        request.headers_mut().insert(
            "authorization",
            HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], MISSING_TOKEN_CODE);
        assert_eq!(authority.validate_calls(), 0);
        // Rejected by the resolver, not short-circuited before it
        assert!(logs_contain("No usable bearer token"));
    }

    #[tokio::test]
    async fn test_rejected_token_is_401_unauthorized() {
        let authority = Arc::new(MockTokenAuthority::rejecting("expired"));
        let app = app(authority, gold());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Bearer abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], UNAUTHORIZED_CODE);
        // The rejection reason stays in the log
        assert!(!body.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_upstream_fault_is_500_with_correlation_fields() {
        let authority = Arc::new(MockTokenAuthority::accepting(
            "u1",
            Utc::now() + ChronoDuration::hours(1),
        ));
        let app = app(authority, Arc::new(MockEntitlements::failing()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Bearer abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["id"].as_u64().unwrap() >= 10_000);
        assert_eq!(body["area"], "claims-service");
        assert!(body["utcTime"].is_string());
    }
}
