//! gpumgr CLI
//!
//! Command-line interface for the GPU manager daemon.

mod commands;

use clap::{Parser, Subcommand};
use gpumgr_core::{Priority, ServiceKind};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpumgr - inspect and drive the GPU manager
#[derive(Parser, Debug)]
#[command(name = "gpumgr")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8100", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show devices, allocations and service health
    Status,

    /// Check that the daemon is up
    Health,

    /// Request a GPU allocation
    Allocate {
        /// Service kind (ollama, comfyui, automatic1111, whisper, video_gen)
        service: ServiceKind,

        /// Priority name or level (CRITICAL=0 .. BATCH=4)
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Estimated VRAM need in MB
        #[arg(long, default_value_t = 4000)]
        vram: u64,

        /// Estimated task duration in seconds
        #[arg(long, default_value_t = 30.0)]
        duration: f64,

        /// Workflow type tag
        #[arg(long)]
        workflow: Option<String>,

        /// Pipeline this request belongs to
        #[arg(long)]
        pipeline: Option<String>,
    },

    /// Release an allocation
    Release {
        /// Allocation ID returned by allocate
        allocation_id: String,
    },

    /// Dump Prometheus metrics
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Status => commands::status(&client).await?,
        Commands::Health => commands::health(&client).await?,
        Commands::Allocate {
            service,
            priority,
            vram,
            duration,
            workflow,
            pipeline,
        } => {
            let mut request = gpumgr_core::AllocationRequest::new(service, priority)
                .with_vram(vram)
                .with_duration(duration);
            request.workflow_type = workflow;
            request.pipeline_id = pipeline;
            commands::allocate(&client, &request).await?;
        }
        Commands::Release { allocation_id } => {
            commands::release(&client, allocation_id).await?;
        }
        Commands::Metrics => commands::metrics(&client).await?,
    }

    Ok(())
}
