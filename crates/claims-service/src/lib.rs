//! Claims Service Library
//!
//! Resolves the authorization context for API requests. An incoming bearer
//! token is validated with the Token Authority, enriched with product claims
//! from the Entitlement Service, and cached until the token expires.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/pipeline.rs -> auth/{cache,authenticator,entitlements}.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Claims types, cache, upstream clients and the resolution pipeline
//! - `config` - Service configuration from environment
//! - `errors` - Client-safe and internal error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - Claims middleware for protected routes
//! - `observability` - Metrics and performance thresholds
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
