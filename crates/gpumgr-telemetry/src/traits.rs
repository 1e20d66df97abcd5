//! Telemetry trait definitions

use async_trait::async_trait;
use gpumgr_core::{GpuDevice, GpuMgrResult};

/// Source of GPU inventory snapshots
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    /// Take a complete device snapshot
    ///
    /// Fails with `GpuMgrError::Telemetry` when the inventory cannot be read.
    async fn poll(&self) -> GpuMgrResult<Vec<GpuDevice>>;

    /// Get the provider name
    fn name(&self) -> &'static str;
}
