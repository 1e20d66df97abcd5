//! CLI commands implementation

use anyhow::{bail, Result};
use gpumgr_core::{AllocationRequest, AllocationView, GpuDevice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Liveness response
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device_count: usize,
}

/// Service health entry in the status response
#[derive(Debug, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub healthy: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub gpus: Vec<GpuDevice>,
    pub allocations: BTreeMap<String, AllocationView>,
    pub total_vram_mb: u64,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceHealth>,
}

/// Allocation response
#[derive(Debug, Deserialize)]
pub struct AllocationResponse {
    pub allocation_id: String,
    pub gpu_indices: Vec<u32>,
    pub memory_limit_mb: u64,
    pub message: String,
    pub wait_time_s: f64,
}

/// Release response
#[derive(Debug, Deserialize)]
pub struct ReleaseResponse {
    pub message: String,
}

async fn failure(response: reqwest::Response, action: &str) -> Result<()> {
    let status = response.status();
    let error = response.text().await?;
    bail!("Failed to {} ({}): {}", action, status, error)
}

/// Show devices, allocations and service health
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/status")).send().await?;
    if !response.status().is_success() {
        return failure(response, "get status").await;
    }

    let status: StatusResponse = response.json().await?;

    if status.gpus.is_empty() {
        println!("No GPUs detected");
    } else {
        println!(
            "{:<5} {:<28} {:>10} {:>10} {:>10} {:>6} {:>6}",
            "GPU", "NAME", "TOTAL", "USED", "FREE", "UTIL", "TEMP"
        );
        println!("{}", "-".repeat(80));
        for gpu in &status.gpus {
            println!(
                "{:<5} {:<28} {:>10} {:>10} {:>10} {:>5}% {:>5}C",
                gpu.index,
                truncate(&gpu.name, 28),
                format_mb(gpu.total_memory_mb),
                format_mb(gpu.used_memory_mb),
                format_mb(gpu.free_memory_mb),
                gpu.utilization_percent,
                gpu.temperature_c
            );
        }
    }
    println!("Total VRAM: {}", format_mb(status.total_vram_mb));

    println!();
    if status.allocations.is_empty() {
        println!("No allocations");
    } else {
        println!(
            "{:<28} {:<14} {:<9} {:>10} {:>7} {:>8}",
            "ID", "SERVICE", "PRIORITY", "LIMIT", "ACTIVE", "IDLE"
        );
        println!("{}", "-".repeat(80));
        for alloc in status.allocations.values() {
            println!(
                "{:<28} {:<14} {:<9} {:>10} {:>7} {:>7.0}s",
                alloc.id.as_str(),
                alloc.service.as_str(),
                alloc.priority,
                format_mb(alloc.memory_limit_mb),
                alloc.active_requests,
                alloc.idle_secs
            );
        }
    }

    if !status.services.is_empty() {
        println!();
        for service in status.services.values() {
            match (&service.error, service.healthy) {
                (_, true) => println!("  {:<14} healthy", service.service),
                (Some(error), false) => {
                    println!("  {:<14} unhealthy ({})", service.service, error)
                }
                (None, false) => println!("  {:<14} unhealthy", service.service),
            }
        }
    }

    Ok(())
}

/// Check that the daemon is up
pub async fn health(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/health")).send().await?;
    if !response.status().is_success() {
        return failure(response, "check health").await;
    }

    let health: HealthResponse = response.json().await?;
    println!("Daemon is {} ({} GPUs)", health.status, health.device_count);
    Ok(())
}

/// Request a GPU allocation
pub async fn allocate(client: &ApiClient, request: &AllocationRequest) -> Result<()> {
    debug!(service = %request.service, "Requesting allocation");

    let response = client
        .client
        .post(client.url("/allocate"))
        .json(request)
        .send()
        .await?;
    if !response.status().is_success() {
        return failure(response, "allocate").await;
    }

    let alloc: AllocationResponse = response.json().await?;
    println!("{}", alloc.message);
    println!("  ID: {}", alloc.allocation_id);
    println!("  GPUs: {:?}", alloc.gpu_indices);
    println!("  Limit: {}", format_mb(alloc.memory_limit_mb));
    if alloc.wait_time_s > 0.0 {
        println!("  Expected wait: {:.1}s", alloc.wait_time_s);
    }

    Ok(())
}

/// Release an allocation
pub async fn release(client: &ApiClient, allocation_id: String) -> Result<()> {
    #[derive(Serialize)]
    struct ReleaseRequest {
        allocation_id: String,
    }

    let response = client
        .client
        .post(client.url("/release"))
        .json(&ReleaseRequest { allocation_id })
        .send()
        .await?;
    if !response.status().is_success() {
        return failure(response, "release").await;
    }

    let release: ReleaseResponse = response.json().await?;
    println!("{}", release.message);
    Ok(())
}

/// Dump Prometheus metrics
pub async fn metrics(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/metrics")).send().await?;
    if !response.status().is_success() {
        return failure(response, "get metrics").await;
    }

    print!("{}", response.text().await?);
    Ok(())
}

/// Format megabytes for display
fn format_mb(mb: u64) -> String {
    if mb >= 1024 {
        format!("{:.1} GB", mb as f64 / 1024.0)
    } else {
        format!("{} MB", mb)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_strips_trailing_slash() {
        let client = ApiClient::new("http://localhost:8100/");
        assert_eq!(client.url("/status"), "http://localhost:8100/status");
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(512), "512 MB");
        assert_eq!(format_mb(24576), "24.0 GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("RTX 4090", 28), "RTX 4090");
        assert_eq!(truncate("NVIDIA GeForce RTX 4090 Laptop GPU", 12), "NVIDIA Ge...");
    }
}
