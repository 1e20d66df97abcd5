//! GPU manager daemon
//!
//! Serves the allocation API and runs reconciliation and health checks
//! in the background until interrupted.

use anyhow::Context;
use clap::Parser;
use gpumgr_api::create_router;
use gpumgr_core::DaemonConfig;
use gpumgr_health::HealthChecker;
use gpumgr_scheduler::{BackgroundTasks, GpuManager};
use gpumgr_telemetry::{NvidiaSmiConfig, NvidiaSmiProvider};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// gpumgrd - shares GPU memory between AI services
#[derive(Parser, Debug)]
#[command(name = "gpumgrd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Path to the nvidia-smi binary
    #[arg(long)]
    nvidia_smi: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(path) = self.nvidia_smi {
            config.telemetry.nvidia_smi_path = path;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging.level);

    info!("Starting gpumgr daemon v{}", env!("CARGO_PKG_VERSION"));

    let telemetry = NvidiaSmiProvider::new(NvidiaSmiConfig {
        binary: config.telemetry.nvidia_smi_path.clone(),
        timeout: config.telemetry.timeout(),
    });
    let health = HealthChecker::from_config(&config.health)?;
    info!(
        services = config.health.endpoints.len(),
        timeout_ms = health.timeout().as_millis() as u64,
        "Health checks configured"
    );

    let manager = Arc::new(GpuManager::new(
        Arc::new(telemetry),
        health,
        config.reconcile.stale_timeout(),
    ));
    manager.initialize().await;

    let tasks = BackgroundTasks::spawn(Arc::clone(&manager), &config.reconcile, &config.health);

    let router = create_router(Arc::clone(&manager), &config.api);

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.api.address))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tasks.shutdown().await;
    served.context("API server error")?;

    info!("gpumgr daemon stopped");
    Ok(())
}
