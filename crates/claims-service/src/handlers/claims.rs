//! Resolved claims handler.

use crate::auth::Claims;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /v1/claims
///
/// Returns the claims the middleware resolved for the caller's token.
///
/// ## Response
///
/// ```json
/// {
///   "subject": "u1",
///   "identityClaims": { "sub": "u1", "scope": "read" },
///   "productClaims": { "plan": "gold" }
/// }
/// ```
#[instrument(skip_all, name = "claims.handlers.claims")]
pub async fn get_claims(Extension(claims): Extension<Claims>) -> Json<Claims> {
    tracing::debug!(target: "claims.handlers.claims", "Returning resolved claims");
    Json(claims)
}
