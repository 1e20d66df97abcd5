//! gpumgr-health: Health checking for GPU services
//!
//! Probes the HTTP endpoint of each service kind and reports whether it is
//! serving. Kinds without a configured endpoint are always healthy.

pub mod health;

pub use health::{HealthChecker, ServiceHealth};
