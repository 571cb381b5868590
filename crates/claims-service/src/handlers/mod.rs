//! HTTP request handlers for the claims service.

pub mod claims;
pub mod health;
pub mod metrics;

pub use claims::get_claims;
pub use health::health_check;
pub use metrics::metrics_handler;
