//! gpumgr-telemetry: GPU inventory collection
//!
//! This crate provides the telemetry providers the allocator polls:
//! - `nvidia-smi` based provider for NVIDIA hosts
//! - In-memory fake provider with injectable snapshots and failures

pub mod fake;
pub mod nvidia_smi;
pub mod traits;

pub use fake::FakeTelemetry;
pub use nvidia_smi::{NvidiaSmiConfig, NvidiaSmiProvider};
pub use traits::TelemetryProvider;
