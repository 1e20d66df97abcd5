//! gpumgr-core: Core types for the gpumgr allocator
//!
//! This crate provides the fundamental types used throughout gpumgr:
//! - GPU device snapshots reported by telemetry
//! - Service kinds, capacity profiles and priorities
//! - Allocation records and request/response payloads
//! - Configuration types
//! - Error handling

pub mod allocation;
pub mod config;
pub mod error;
pub mod gpu;
pub mod service;

pub use allocation::*;
pub use config::*;
pub use error::*;
pub use gpu::*;
pub use service::*;
