//! Observability for the claims service.
//!
//! Provides metrics definitions and the performance threshold checks applied
//! to each pipeline step.

pub mod metrics;
pub mod performance;
