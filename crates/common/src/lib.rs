//! Common utilities and types shared across the claims service crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer access tokens and their log-safe fingerprints
pub mod token;
