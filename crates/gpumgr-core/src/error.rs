//! Error types for gpumgr

use thiserror::Error;

/// Main error type for gpumgr
#[derive(Error, Debug)]
pub enum GpuMgrError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry could not be collected
    #[error("Telemetry unavailable: {0}")]
    Telemetry(String),

    /// No GPU inventory has ever been observed
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Allocation id not present in the ledger
    #[error("Unknown allocation: {0}")]
    UnknownAllocation(String),

    /// Dependent service health probe failed
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// API error
    #[error("API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gpumgr operations
pub type GpuMgrResult<T> = Result<T, GpuMgrError>;

impl From<serde_json::Error> for GpuMgrError {
    fn from(err: serde_json::Error) -> Self {
        GpuMgrError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuMgrError {
    fn from(err: toml::de::Error) -> Self {
        GpuMgrError::Config(err.to_string())
    }
}
