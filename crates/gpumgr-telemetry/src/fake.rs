//! In-memory telemetry provider for tests and GPU-less hosts

use async_trait::async_trait;
use gpumgr_core::{GpuDevice, GpuMgrError, GpuMgrResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::traits::TelemetryProvider;

/// Telemetry provider returning injected snapshots
pub struct FakeTelemetry {
    devices: Mutex<Vec<GpuDevice>>,
    failing: Mutex<bool>,
    /// Simulated latency of each poll
    delay: Mutex<Duration>,
    polls: AtomicUsize,
}

impl FakeTelemetry {
    /// Create a provider that reports `devices` on every poll
    pub fn new(devices: Vec<GpuDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            failing: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
            polls: AtomicUsize::new(0),
        }
    }

    /// A single idle device with `total_memory_mb` of VRAM
    pub fn single(total_memory_mb: u64) -> Self {
        Self::new(vec![GpuDevice::new(0, "Fake GPU 0", total_memory_mb)])
    }

    /// Create a provider whose every poll fails
    pub fn failing() -> Self {
        let fake = Self::new(Vec::new());
        fake.set_failing(true);
        fake
    }

    /// Replace the snapshot returned by subsequent polls
    pub fn set_devices(&self, devices: Vec<GpuDevice>) {
        if let Ok(mut guard) = self.devices.lock() {
            *guard = devices;
        }
    }

    /// Make subsequent polls fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut guard) = self.failing.lock() {
            *guard = failing;
        }
    }

    /// Make subsequent polls take `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = delay;
        }
    }

    /// Number of polls served so far
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryProvider for FakeTelemetry {
    async fn poll(&self) -> GpuMgrResult<Vec<GpuDevice>> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .delay
            .lock()
            .map(|delay| *delay)
            .map_err(|_| GpuMgrError::Internal("fake telemetry lock poisoned".to_string()))?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .lock()
            .map_err(|_| GpuMgrError::Internal("fake telemetry lock poisoned".to_string()))?;
        if *failing {
            return Err(GpuMgrError::Telemetry("injected failure".to_string()));
        }
        drop(failing);

        self.devices
            .lock()
            .map(|devices| devices.clone())
            .map_err(|_| GpuMgrError::Internal("fake telemetry lock poisoned".to_string()))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
