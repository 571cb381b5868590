//! Resolved claims.
//!
//! A [`Claims`] value only exists once a token has been validated by the
//! Token Authority and enriched by the Entitlement Service. The `subject` is
//! redacted in Debug output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Claim name to value mapping.
pub type ClaimMap = BTreeMap<String, Value>;

/// Identity claims returned by the Token Authority.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable user or client identifier.
    pub subject: String,

    /// Everything the authority reported about the identity, including `sub`.
    pub claims: ClaimMap,
}

impl IdentityClaims {
    pub fn new(subject: impl Into<String>, claims: ClaimMap) -> Self {
        Self {
            subject: subject.into(),
            claims,
        }
    }

    /// Merge additional identity claims, e.g. from the userinfo endpoint.
    ///
    /// Existing keys are overwritten except `sub`, which always stays the
    /// subject the authority validated.
    pub fn merge(&mut self, extra: ClaimMap) {
        for (name, value) in extra {
            if name != "sub" {
                self.claims.insert(name, value);
            }
        }
    }
}

impl fmt::Debug for IdentityClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityClaims")
            .field("subject", &"[REDACTED]")
            .field("claim_names", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The authorization context for a request.
///
/// Immutable once built: fields are private and only readable.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    subject: String,
    identity_claims: ClaimMap,
    product_claims: ClaimMap,
}

impl Claims {
    /// Combine identity claims with product claims from the Entitlement Service.
    pub fn new(identity: IdentityClaims, product_claims: ClaimMap) -> Self {
        Self {
            subject: identity.subject,
            identity_claims: identity.claims,
            product_claims,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn identity_claims(&self) -> &ClaimMap {
        &self.identity_claims
    }

    pub fn product_claims(&self) -> &ClaimMap {
        &self.product_claims
    }

    /// Look up a product claim by name.
    pub fn product_claim(&self, name: &str) -> Option<&Value> {
        self.product_claims.get(name)
    }
}

/// Custom Debug implementation that redacts the subject.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("subject", &"[REDACTED]")
            .field("identity_claims", &self.identity_claims.keys().collect::<Vec<_>>())
            .field("product_claims", &self.product_claims.keys().collect::<Vec<_>>())
            .finish()
    }
}
