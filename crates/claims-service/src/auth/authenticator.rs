//! Token validation against the Token Authority.
//!
//! [`TokenAuthenticator`] is the seam the pipeline depends on.
//! [`IntrospectionClient`] implements it over HTTP:
//!
//! - `validate` POSTs the token to an RFC 7662 introspection endpoint using
//!   HTTP Basic client credentials. One round trip.
//! - `user_info` GETs the authority's userinfo endpoint with the caller's
//!   token, when one is configured.
//!
//! A token the authority reports as inactive or expired is a normal
//! [`ValidationResult::Invalid`]. Transport failures, error statuses and
//! unreadable responses are [`ApiError`]s.

use crate::auth::claims::{ClaimMap, IdentityClaims};
use crate::errors::{codes, ApiError};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::token::AccessToken;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default connect timeout for Token Authority requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of validating a token.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The authority accepted the token.
    Valid {
        identity: IdentityClaims,
        /// Expiry reported by the authority. Used verbatim as the cache expiry.
        expires_at: DateTime<Utc>,
    },

    /// The authority rejected the token. `reason` is for logs only.
    Invalid { reason: String },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }
}

/// Token Authority operations (enables mocking).
#[async_trait::async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// Validate a token with exactly one call to the Token Authority.
    async fn validate(&self, token: &AccessToken) -> Result<ValidationResult, ApiError>;

    /// Fetch additional identity claims for an already validated token.
    ///
    /// Returns `Ok(None)` when no user info source is configured.
    async fn user_info(&self, _token: &AccessToken) -> Result<Option<ClaimMap>, ApiError> {
        Ok(None)
    }
}

/// RFC 7662 introspection response.
#[derive(Deserialize)]
struct IntrospectionResponse {
    active: bool,

    #[serde(default)]
    sub: Option<String>,

    #[serde(default)]
    exp: Option<i64>,

    /// Remaining members (scope, client_id, username, ...).
    #[serde(flatten)]
    extra: ClaimMap,
}

/// HTTP client for the Token Authority.
pub struct IntrospectionClient {
    http_client: reqwest::Client,
    introspection_url: String,
    userinfo_url: Option<String>,
    client_id: String,
    client_secret: SecretString,
}

impl IntrospectionClient {
    /// Create a new introspection client.
    ///
    /// # Arguments
    ///
    /// * `introspection_url` - Token Authority introspection endpoint
    /// * `userinfo_url` - Optional userinfo endpoint for extra identity claims
    /// * `client_id` / `client_secret` - Credentials for the introspection call
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` if the HTTP client cannot be built.
    pub fn new(
        introspection_url: String,
        userinfo_url: Option<String>,
        client_id: String,
        client_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                ApiError::new(codes::SERVER_ERROR, "Failed to build HTTP client").with_source(&e)
            })?;

        Ok(Self {
            http_client,
            introspection_url,
            userinfo_url,
            client_id,
            client_secret,
        })
    }

    fn interpret(response: IntrospectionResponse) -> Result<ValidationResult, ApiError> {
        if !response.active {
            return Ok(ValidationResult::Invalid {
                reason: "Token Authority reported the token as inactive".to_string(),
            });
        }

        let subject = response.sub.ok_or_else(|| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "Token validation failed")
                .with_details("Introspection response for an active token has no sub")
        })?;

        let exp = response.exp.ok_or_else(|| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "Token validation failed")
                .with_details("Introspection response for an active token has no exp")
        })?;

        let expires_at = DateTime::<Utc>::from_timestamp(exp, 0).ok_or_else(|| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "Token validation failed")
                .with_details(format!("Introspection exp {exp} is out of range"))
        })?;

        if expires_at < Utc::now() {
            return Ok(ValidationResult::Invalid {
                reason: format!("Token expired at {expires_at}"),
            });
        }

        let mut claims = response.extra;
        claims.insert("sub".to_string(), Value::String(subject.clone()));

        Ok(ValidationResult::Valid {
            identity: IdentityClaims::new(subject, claims),
            expires_at,
        })
    }
}

#[async_trait::async_trait]
impl TokenAuthenticator for IntrospectionClient {
    #[instrument(skip_all, fields(token = %token.fingerprint()))]
    async fn validate(&self, token: &AccessToken) -> Result<ValidationResult, ApiError> {
        let start = Instant::now();

        let result = self
            .http_client
            .post(&self.introspection_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header("Accept", "application/json")
            .form(&[
                ("token", token.expose()),
                ("token_type_hint", "access_token"),
            ])
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_request("introspection", "error", start.elapsed());
                debug!(target: "claims.auth.authenticator", "Introspection request failed");
                return Err(
                    ApiError::new(codes::INTROSPECTION_FAILURE, "Token validation failed")
                        .with_details("Token Authority request failed")
                        .with_source(&e),
                );
            }
        };

        let status = response.status();
        metrics::record_upstream_request("introspection", status.as_str(), start.elapsed());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(target: "claims.auth.authenticator", status = status.as_u16(), "Token Authority returned error");
            return Err(
                ApiError::new(codes::INTROSPECTION_FAILURE, "Token validation failed")
                    .with_details(format!("Token Authority returned {status}: {body}")),
            );
        }

        let parsed: IntrospectionResponse = response.json().await.map_err(|e| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "Token validation failed")
                .with_details("Failed to parse introspection response")
                .with_source(&e)
        })?;

        let result = Self::interpret(parsed)?;
        debug!(
            target: "claims.auth.authenticator",
            valid = result.is_valid(),
            "Token introspection completed"
        );
        Ok(result)
    }

    #[instrument(skip_all, fields(token = %token.fingerprint()))]
    async fn user_info(&self, token: &AccessToken) -> Result<Option<ClaimMap>, ApiError> {
        let Some(url) = &self.userinfo_url else {
            return Ok(None);
        };

        let start = Instant::now();

        let result = self
            .http_client
            .get(url)
            .bearer_auth(token.expose())
            .header("Accept", "application/json")
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_request("userinfo", "error", start.elapsed());
                debug!(target: "claims.auth.authenticator", "User info request failed");
                return Err(
                    ApiError::new(codes::USERINFO_FAILURE, "User info lookup failed")
                        .with_details("Token Authority userinfo request failed")
                        .with_source(&e),
                );
            }
        };

        let status = response.status();
        metrics::record_upstream_request("userinfo", status.as_str(), start.elapsed());

        if !status.is_success() {
            debug!(target: "claims.auth.authenticator", status = status.as_u16(), "Userinfo endpoint returned error");
            return Err(
                ApiError::new(codes::USERINFO_FAILURE, "User info lookup failed")
                    .with_details(format!("Userinfo endpoint returned {status}")),
            );
        }

        let claims: ClaimMap = response.json().await.map_err(|e| {
            ApiError::new(codes::UPSTREAM_DATA_ERROR, "User info lookup failed")
                .with_details("Failed to parse userinfo response")
                .with_source(&e)
        })?;

        Ok(Some(claims))
    }
}

/// Mock Token Authority for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-process authenticator with call counting.
    pub struct MockTokenAuthority {
        result: Option<ValidationResult>,
        user_info: Option<ClaimMap>,
        validate_calls: AtomicUsize,
        user_info_calls: AtomicUsize,
    }

    impl MockTokenAuthority {
        /// Accept every token as `subject`, expiring at `expires_at`.
        pub fn accepting(subject: &str, expires_at: DateTime<Utc>) -> Self {
            let mut claims = ClaimMap::new();
            claims.insert("sub".to_string(), Value::String(subject.to_string()));
            Self::with_result(ValidationResult::Valid {
                identity: IdentityClaims::new(subject, claims),
                expires_at,
            })
        }

        /// Reject every token.
        pub fn rejecting(reason: &str) -> Self {
            Self::with_result(ValidationResult::Invalid {
                reason: reason.to_string(),
            })
        }

        /// Fail every call as if the authority were down.
        pub fn failing() -> Self {
            Self {
                result: None,
                user_info: None,
                validate_calls: AtomicUsize::new(0),
                user_info_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_result(result: ValidationResult) -> Self {
            Self {
                result: Some(result),
                user_info: None,
                validate_calls: AtomicUsize::new(0),
                user_info_calls: AtomicUsize::new(0),
            }
        }

        /// Also return these claims from `user_info`.
        pub fn with_user_info(mut self, claims: ClaimMap) -> Self {
            self.user_info = Some(claims);
            self
        }

        pub fn validate_calls(&self) -> usize {
            self.validate_calls.load(Ordering::SeqCst)
        }

        pub fn user_info_calls(&self) -> usize {
            self.user_info_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenAuthenticator for MockTokenAuthority {
        async fn validate(&self, _token: &AccessToken) -> Result<ValidationResult, ApiError> {
            self.validate_calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().ok_or_else(|| {
                ApiError::new(codes::INTROSPECTION_FAILURE, "Token validation failed")
                    .with_details("Mock Token Authority failure")
            })
        }

        async fn user_info(&self, _token: &AccessToken) -> Result<Option<ClaimMap>, ApiError> {
            self.user_info_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.user_info.clone())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, userinfo: bool) -> IntrospectionClient {
        IntrospectionClient::new(
            format!("{}/oauth2/introspect", server.uri()),
            userinfo.then(|| format!("{}/oauth2/userinfo", server.uri())),
            "claims-service".to_string(),
            SecretString::from("introspection-secret"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_interpret_inactive_is_invalid() {
        let response: IntrospectionResponse =
            serde_json::from_value(json!({"active": false})).unwrap();
        let result = IntrospectionClient::interpret(response).unwrap();
        assert!(!result.is_valid());
    }

    #[test]
    fn test_interpret_active_keeps_extra_claims() {
        let exp = future_exp();
        let response: IntrospectionResponse = serde_json::from_value(json!({
            "active": true,
            "sub": "u1",
            "exp": exp,
            "scope": "read write",
            "client_id": "web-app"
        }))
        .unwrap();

        let result = IntrospectionClient::interpret(response).unwrap();
        assert!(result.is_valid());

        if let ValidationResult::Valid {
            identity,
            expires_at,
        } = result
        {
            assert_eq!(identity.subject, "u1");
            assert_eq!(identity.claims["sub"], "u1");
            assert_eq!(identity.claims["scope"], "read write");
            assert_eq!(identity.claims["client_id"], "web-app");
            assert!(!identity.claims.contains_key("active"));
            assert_eq!(expires_at.timestamp(), exp);
        }
    }

    #[test]
    fn test_interpret_expired_active_token_is_invalid() {
        let response: IntrospectionResponse = serde_json::from_value(json!({
            "active": true,
            "sub": "u1",
            "exp": Utc::now().timestamp() - 10
        }))
        .unwrap();

        assert!(!IntrospectionClient::interpret(response).unwrap().is_valid());
    }

    #[test]
    fn test_interpret_active_without_sub_is_fault() {
        let response: IntrospectionResponse =
            serde_json::from_value(json!({"active": true, "exp": future_exp()})).unwrap();
        let err = IntrospectionClient::interpret(response).unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_DATA_ERROR);
    }

    #[test]
    fn test_interpret_active_without_exp_is_fault() {
        let response: IntrospectionResponse =
            serde_json::from_value(json!({"active": true, "sub": "u1"})).unwrap();
        assert!(IntrospectionClient::interpret(response).is_err());
    }

    #[tokio::test]
    async fn test_validate_sends_token_with_client_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/introspect"))
            .and(header_exists("authorization"))
            .and(body_string_contains("token=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "sub": "u1",
                "exp": future_exp()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let result = client.validate(&AccessToken::new("abc123")).await.unwrap();
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_validate_inactive_is_not_a_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let result = client.validate(&AccessToken::new("abc123")).await.unwrap();
        assert!(matches!(result, ValidationResult::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_validate_server_error_is_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/introspect"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let err = client.validate(&AccessToken::new("abc123")).await.unwrap_err();
        assert_eq!(err.code(), codes::INTROSPECTION_FAILURE);
        assert!(err.details().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_validate_garbage_body_is_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let err = client.validate(&AccessToken::new("abc123")).await.unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_DATA_ERROR);
    }

    #[tokio::test]
    async fn test_validate_unreachable_authority_is_fault() {
        let client = IntrospectionClient::new(
            "http://127.0.0.1:1/oauth2/introspect".to_string(),
            None,
            "claims-service".to_string(),
            SecretString::from("secret"),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.validate(&AccessToken::new("abc123")).await.unwrap_err();
        assert_eq!(err.code(), codes::INTROSPECTION_FAILURE);
    }

    #[tokio::test]
    async fn test_user_info_without_url_makes_no_call() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        assert!(client
            .user_info(&AccessToken::new("abc123"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_user_info_forwards_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/oauth2/userinfo"))
            .and(header("authorization", "Bearer abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "given_name": "Ada",
                "family_name": "Lovelace",
                "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let claims = client
            .user_info(&AccessToken::new("abc123"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claims["given_name"], "Ada");
        assert_eq!(claims["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_user_info_error_is_fault() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/oauth2/userinfo"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let err = client.user_info(&AccessToken::new("abc123")).await.unwrap_err();
        assert_eq!(err.code(), codes::USERINFO_FAILURE);
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = mock::MockTokenAuthority::rejecting("nope");
        let token = AccessToken::new("abc123");

        assert!(!mock.validate(&token).await.unwrap().is_valid());
        assert!(!mock.validate(&token).await.unwrap().is_valid());
        assert_eq!(mock.validate_calls(), 2);
        assert_eq!(mock.user_info_calls(), 0);
    }
}
