//! Configuration types for gpumgr

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::ServiceKind;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
    /// Reconciliation loop configuration
    pub reconcile: ReconcileConfig,
    /// Service health check configuration
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuMgrError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuMgrError::Config(format!("Failed to read config file: {}", e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::GpuMgrError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background tasks cannot run with
    pub fn validate(&self) -> Result<(), crate::GpuMgrError> {
        let non_zero = [
            ("reconcile.interval_secs", self.reconcile.interval_secs),
            ("health.interval_secs", self.health.interval_secs),
            ("health.timeout_secs", self.health.timeout_secs),
            ("telemetry.timeout_secs", self.telemetry.timeout_secs),
        ];

        for (key, value) in non_zero {
            if value == 0 {
                return Err(crate::GpuMgrError::Config(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }

        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8100,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Path to the nvidia-smi binary
    pub nvidia_smi_path: PathBuf,
    /// Upper bound on a single inventory query, in seconds
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            nvidia_smi_path: PathBuf::from("nvidia-smi"),
            timeout_secs: 10,
        }
    }
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Interval between reconciliation passes in seconds
    pub interval_secs: u64,
    /// Idle time after which an allocation without active requests is dropped
    pub stale_timeout_secs: u64,
    /// How long shutdown waits for background tasks before aborting them
    pub shutdown_grace_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            stale_timeout_secs: 300,
            shutdown_grace_secs: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Service health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_secs: u64,
    /// Health check timeout in seconds
    pub timeout_secs: u64,
    /// Health endpoint per service. Kinds without an entry are always healthy.
    pub endpoints: HashMap<ServiceKind, String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let endpoints = ServiceKind::ALL
            .into_iter()
            .filter_map(|kind| {
                kind.default_health_endpoint()
                    .map(|url| (kind, url.to_string()))
            })
            .collect();

        Self {
            interval_secs: 30,
            timeout_secs: 5,
            endpoints,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `tracing` filter directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
