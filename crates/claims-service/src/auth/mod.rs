//! Claims resolution.
//!
//! # Components
//!
//! - `claims` - Identity and product claims for an authorized request
//! - `cache` - Claims cache keyed by token digest, with a background sweeper
//! - `authenticator` - Token Authority introspection and user info
//! - `entitlements` - Product claims from the Entitlement Service
//! - `pipeline` - The resolution flow tying the above together

pub mod authenticator;
pub mod cache;
pub mod claims;
pub mod entitlements;
pub mod pipeline;

pub use authenticator::{IntrospectionClient, TokenAuthenticator, ValidationResult};
pub use cache::{start_cache_sweeper, ClaimsCache};
pub use claims::{ClaimMap, Claims, IdentityClaims};
pub use entitlements::{ClaimsEnricher, EntitlementClient};
pub use pipeline::{extract_bearer_token, ClaimsResolver};
