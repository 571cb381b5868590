//! Bearer access tokens.
//!
//! Inbound tokens are opaque secrets. They are wrapped in [`AccessToken`] as
//! soon as they are read from the `Authorization` header and only exposed at
//! the exact point where an upstream call needs the raw value.
//!
//! Two derived values are available:
//! - [`AccessToken::digest`] is the full SHA-256 of the token, used as a cache
//!   key so raw tokens are never retained as map keys.
//! - [`AccessToken::fingerprint`] is a short hex prefix of that digest, safe to
//!   attach to log records for correlation.

use crate::secret::{ExposeSecret, SecretString};
use ring::digest::{digest, SHA256};
use std::fmt;

/// Maximum accepted token size in bytes (8KB).
///
/// Oversized tokens are rejected before hashing or any upstream call.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Number of hex characters kept in a log fingerprint.
const FINGERPRINT_HEX_LEN: usize = 12;

/// SHA-256 digest of an access token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    /// Short hex prefix suitable for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let full = hex::encode(self.0);
        full.get(..FINGERPRINT_HEX_LEN).unwrap_or(&full).to_string()
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenDigest").field(&self.fingerprint()).finish()
    }
}

/// An opaque bearer token received from a caller.
///
/// `Debug` never prints the token value.
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    digest: TokenDigest,
}

impl AccessToken {
    /// Wrap a raw token value.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let hash = digest(&SHA256, raw.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(hash.as_ref());

        Self {
            value: SecretString::from(raw),
            digest: TokenDigest(bytes),
        }
    }

    /// The raw token value, for forwarding to upstream services only.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Cache key for this token.
    #[must_use]
    pub fn digest(&self) -> TokenDigest {
        self.digest
    }

    /// Log-safe identifier for this token.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.digest.fingerprint()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = AccessToken::new("abc123-very-secret");
        let debug_str = format!("{token:?}");

        assert!(!debug_str.contains("abc123-very-secret"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains(&token.fingerprint()));
    }

    #[test]
    fn test_expose_returns_raw_value() {
        let token = AccessToken::new("abc123");
        assert_eq!(token.expose(), "abc123");
    }

    #[test]
    fn test_same_token_same_digest() {
        let a = AccessToken::new("abc123");
        let b = AccessToken::new("abc123");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_different_tokens_different_digest() {
        let a = AccessToken::new("abc123");
        let b = AccessToken::new("abc124");
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_fingerprint_is_short_hex() {
        let token = AccessToken::new("abc123");
        let fingerprint = token.fingerprint();

        assert_eq!(fingerprint.len(), FINGERPRINT_HEX_LEN);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
        let token = AccessToken::new("abc");
        assert_eq!(token.fingerprint(), "ba7816bf8f01");
    }
}
