//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for every sensitive value the claims service handles: inbound bearer tokens,
//! the introspection client secret, and anything derived from them.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct IntrospectionCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = IntrospectionCredentials {
//!     client_id: "claims-service".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! // Safe: client_secret is redacted
//! println!("{:?}", creds);
//!
//! // Reading the value requires an explicit call
//! let secret: &str = creds.client_secret.expose_secret();
//! ```
//!
//! # Usage Guidelines
//!
//! Use `SecretString` for:
//! - Bearer access tokens received from callers
//! - OAuth client secrets used for introspection
//!
//! Use [`crate::token::AccessToken`] rather than a bare `SecretString` when
//! the value is an inbound bearer token, so that a fingerprint is available
//! for log correlation.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
