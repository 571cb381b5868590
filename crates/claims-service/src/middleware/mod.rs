//! Middleware for the claims service.
//!
//! # Components
//!
//! - `auth` - Resolves claims for protected routes

pub mod auth;

pub use auth::{require_claims, AuthState};
