//! # Claims Test Utilities
//!
//! Shared test utilities for the claims service.
//!
//! This crate provides:
//! - Server test harness (`TestClaimsServer` for E2E tests)
//! - Upstream response fixtures for the Token Authority and Entitlement Service
//!
//! ## Usage
//!
//! ```rust,ignore
//! use claims_test_utils::*;
//! use wiremock::MockServer;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let authority = MockServer::start().await;
//!     let entitlements = MockServer::start().await;
//!     let server = TestClaimsServer::spawn(&authority.uri(), &entitlements.uri()).await?;
//!
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
