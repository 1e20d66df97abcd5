//! GPU device snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A compute process resident on a GPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuProcess {
    /// Process ID
    pub pid: u32,
    /// Device memory held by the process in MB
    pub memory_mb: u64,
    /// Process name as reported by the driver
    pub name: String,
}

/// Represents a GPU device as seen by the last telemetry poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Device index
    pub index: u32,
    /// Device UUID, used to attribute processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Device name
    pub name: String,
    /// Total memory in MB
    pub total_memory_mb: u64,
    /// Used memory in MB
    pub used_memory_mb: u64,
    /// Free memory in MB
    pub free_memory_mb: u64,
    /// Current utilization percentage (0-100)
    pub utilization_percent: u32,
    /// Temperature in degrees Celsius
    pub temperature_c: u32,
    /// Power draw in watts
    pub power_draw_w: f64,
    /// Resident compute processes
    #[serde(default)]
    pub processes: Vec<GpuProcess>,
}

impl GpuDevice {
    /// Create an idle device with the given capacity
    pub fn new(index: u32, name: impl Into<String>, total_memory_mb: u64) -> Self {
        Self {
            index,
            uuid: None,
            name: name.into(),
            total_memory_mb,
            used_memory_mb: 0,
            free_memory_mb: total_memory_mb,
            utilization_percent: 0,
            temperature_c: 0,
            power_draw_w: 0.0,
            processes: Vec::new(),
        }
    }
}

/// A complete device snapshot. Replaced wholesale on every successful poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInventory {
    /// Detected devices, in driver order
    pub devices: Vec<GpuDevice>,
    /// When the snapshot was taken
    pub observed_at: DateTime<Utc>,
}

impl GpuInventory {
    /// Build a snapshot taken now
    pub fn new(devices: Vec<GpuDevice>) -> Self {
        Self {
            devices,
            observed_at: Utc::now(),
        }
    }

    /// Sum of device memory across all GPUs
    pub fn total_memory_mb(&self) -> u64 {
        self.devices.iter().map(|d| d.total_memory_mb).sum()
    }

    /// Free memory on the primary (first) device
    pub fn primary_free_memory_mb(&self) -> u64 {
        self.devices.first().map(|d| d.free_memory_mb).unwrap_or(0)
    }

    /// Index of the primary device
    pub fn primary_index(&self) -> Option<u32> {
        self.devices.first().map(|d| d.index)
    }

    /// Indices of every device
    pub fn indices(&self) -> Vec<u32> {
        self.devices.iter().map(|d| d.index).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
