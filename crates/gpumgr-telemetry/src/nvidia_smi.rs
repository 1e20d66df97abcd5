//! nvidia-smi based telemetry provider
//!
//! Runs the inventory command as a child process and parses its CSV output.
//! Example expected output of the device query:
//! ```console
//! $ nvidia-smi --query-gpu=index,uuid,name,memory.total,memory.used,memory.free,utilization.gpu,temperature.gpu,power.draw --format=csv,noheader,nounits
//! 0, GPU-5f2b6c1e, NVIDIA GeForce RTX 4090, 24564, 1024, 23540, 3, 41, 35.12
//! ```

use async_trait::async_trait;
use gpumgr_core::{GpuDevice, GpuMgrError, GpuMgrResult, GpuProcess};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::traits::TelemetryProvider;

const GPU_QUERY: &str = "--query-gpu=index,uuid,name,memory.total,memory.used,memory.free,\
utilization.gpu,temperature.gpu,power.draw";
const PROCESS_QUERY: &str = "--query-compute-apps=pid,gpu_uuid,used_memory,process_name";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

const GPU_COLUMNS: usize = 9;
const PROCESS_COLUMNS: usize = 4;

/// nvidia-smi provider configuration
#[derive(Debug, Clone)]
pub struct NvidiaSmiConfig {
    /// Path to the nvidia-smi binary
    pub binary: PathBuf,
    /// Upper bound on a single invocation
    pub timeout: Duration,
}

impl Default for NvidiaSmiConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nvidia-smi"),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Telemetry provider backed by the `nvidia-smi` command
pub struct NvidiaSmiProvider {
    config: NvidiaSmiConfig,
}

impl NvidiaSmiProvider {
    /// Create a new nvidia-smi provider
    pub fn new(config: NvidiaSmiConfig) -> Self {
        Self { config }
    }

    /// Build an invocation of the inventory command
    fn build_command(&self, query: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(query).arg(CSV_FORMAT);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run one query and return its stdout
    async fn run(&self, query: &str) -> GpuMgrResult<String> {
        let mut cmd = self.build_command(query);

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| {
                GpuMgrError::Telemetry(format!(
                    "nvidia-smi timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(|e| GpuMgrError::Telemetry(format!("Cannot execute nvidia-smi: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpuMgrError::Telemetry(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TelemetryProvider for NvidiaSmiProvider {
    async fn poll(&self) -> GpuMgrResult<Vec<GpuDevice>> {
        let stdout = self.run(GPU_QUERY).await?;
        let mut devices = parse_gpu_query(&stdout);

        match self.run(PROCESS_QUERY).await {
            Ok(stdout) => attach_processes(&mut devices, parse_process_query(&stdout)),
            Err(e) => {
                warn!(error = %e, "Failed to query GPU processes");
            }
        }

        debug!(devices = devices.len(), "Polled nvidia-smi");
        Ok(devices)
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}

/// Numeric field; `[N/A]`, `[Not Supported]` and blanks read as zero
fn parse_number(field: &str) -> f64 {
    field.trim().parse::<f64>().unwrap_or(0.0)
}

fn parse_gpu_query(output: &str) -> Vec<GpuDevice> {
    let mut devices = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < GPU_COLUMNS {
            warn!(line, "Skipping malformed nvidia-smi line");
            continue;
        }

        let index = match parts[0].parse::<u32>() {
            Ok(index) => index,
            Err(_) => {
                warn!(line, "Skipping nvidia-smi line without device index");
                continue;
            }
        };

        devices.push(GpuDevice {
            index,
            uuid: Some(parts[1].to_string()).filter(|u| !u.is_empty()),
            name: parts[2].to_string(),
            total_memory_mb: parse_number(parts[3]) as u64,
            used_memory_mb: parse_number(parts[4]) as u64,
            free_memory_mb: parse_number(parts[5]) as u64,
            utilization_percent: parse_number(parts[6]) as u32,
            temperature_c: parse_number(parts[7]) as u32,
            power_draw_w: parse_number(parts[8]),
            processes: Vec::new(),
        });
    }

    devices
}

fn parse_process_query(output: &str) -> Vec<(String, GpuProcess)> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < PROCESS_COLUMNS {
                return None;
            }
            let pid = parts[0].parse::<u32>().ok()?;
            Some((
                parts[1].to_string(),
                GpuProcess {
                    pid,
                    memory_mb: parse_number(parts[2]) as u64,
                    name: parts[3].to_string(),
                },
            ))
        })
        .collect()
}

/// Attach processes to the device with the matching UUID, or the first device
fn attach_processes(devices: &mut [GpuDevice], processes: Vec<(String, GpuProcess)>) {
    for (gpu_uuid, process) in processes {
        let position = devices
            .iter()
            .position(|d| d.uuid.as_deref() == Some(gpu_uuid.as_str()))
            .or(if devices.is_empty() { None } else { Some(0) });

        if let Some(position) = position {
            devices[position].processes.push(process);
        }
    }
}
