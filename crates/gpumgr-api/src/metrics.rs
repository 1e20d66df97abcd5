//! Prometheus exposition of the manager status

use gpumgr_core::{GpuMgrError, GpuMgrResult};
use gpumgr_scheduler::ManagerStatus;
use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

fn gauge_vec(registry: &Registry, name: &str, help: &str) -> GpuMgrResult<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), &["gpu"]).map_err(metrics_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(metrics_error)?;
    Ok(gauge)
}

fn int_gauge(registry: &Registry, name: &str, help: &str, value: i64) -> GpuMgrResult<()> {
    let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
    gauge.set(value);
    registry.register(Box::new(gauge)).map_err(metrics_error)
}

fn metrics_error(err: prometheus::Error) -> GpuMgrError {
    GpuMgrError::Api(format!("Failed to build metrics: {}", err))
}

/// Render a status snapshot in the Prometheus text format.
///
/// The registry is rebuilt per scrape so devices that disappear from the
/// inventory stop being exported.
pub fn render(status: &ManagerStatus) -> GpuMgrResult<String> {
    let registry = Registry::new();

    let total = gauge_vec(&registry, "gpu_memory_total_mb", "Total GPU memory in MB")?;
    let used = gauge_vec(&registry, "gpu_memory_used_mb", "Used GPU memory in MB")?;
    let free = gauge_vec(&registry, "gpu_memory_free_mb", "Free GPU memory in MB")?;
    let utilization = gauge_vec(&registry, "gpu_utilization_percent", "GPU utilization")?;
    let temperature = gauge_vec(&registry, "gpu_temperature_celsius", "GPU temperature")?;
    let power = gauge_vec(&registry, "gpu_power_watts", "GPU power draw")?;

    for device in &status.devices {
        let gpu = device.index.to_string();
        let labels = [gpu.as_str()];
        total
            .with_label_values(&labels)
            .set(device.total_memory_mb as f64);
        used.with_label_values(&labels)
            .set(device.used_memory_mb as f64);
        free.with_label_values(&labels)
            .set(device.free_memory_mb as f64);
        utilization
            .with_label_values(&labels)
            .set(device.utilization_percent as f64);
        temperature
            .with_label_values(&labels)
            .set(device.temperature_c as f64);
        power.with_label_values(&labels).set(device.power_draw_w);
    }

    int_gauge(
        &registry,
        "gpu_active_allocations",
        "Allocations with active requests",
        status.active_allocations() as i64,
    )?;
    int_gauge(
        &registry,
        "gpu_total_allocations",
        "Allocations in the ledger",
        status.allocations.len() as i64,
    )?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| GpuMgrError::Api(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| GpuMgrError::Api(format!("Metrics are not UTF-8: {}", e)))
}
