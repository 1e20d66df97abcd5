//! gpumgr-api: HTTP surface of the GPU manager
//!
//! - Allocation requests and releases
//! - Device and allocation status
//! - Prometheus metrics

pub mod metrics;
pub mod rest;

pub use rest::create_router;
