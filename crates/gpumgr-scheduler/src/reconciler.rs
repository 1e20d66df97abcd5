//! Background tasks for the GPU manager
//!
//! Two loops run next to the REST layer, each on its own ticker:
//! - reconciliation: refresh telemetry, evict stale allocations, rebalance
//! - health: probe dependent services and cache the results
//!
//! Both stop on a `watch` shutdown signal. A reconciliation pass cancelled
//! mid-flight leaves the ledger untouched, since all of its mutation happens
//! in one synchronous critical section after the telemetry poll.

use gpumgr_core::{HealthConfig, ReconcileConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::manager::GpuManager;

/// Wait for the shutdown flag. A dropped sender counts as shutdown.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Shortest period a loop ticks at; `tokio::time::interval` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

fn new_ticker(period: Duration) -> Interval {
    if period.is_zero() {
        warn!("Zero loop interval, using the minimum period");
    }
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Run reconciliation passes every `interval` until shutdown
pub async fn run_reconcile_loop(
    manager: Arc<GpuManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_ms = interval.as_millis() as u64,
        "Starting reconciliation loop"
    );

    let mut ticker = new_ticker(interval);
    // The first tick completes immediately; the manager was just initialized
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(&mut shutdown) => break,
        }

        tokio::select! {
            report = manager.reconcile_once() => {
                debug!(
                    telemetry_ok = report.telemetry_ok,
                    evicted = report.evicted.len(),
                    rebalanced = report.rebalanced,
                    "Reconciliation pass complete"
                );
            }
            _ = stopped(&mut shutdown) => break,
        }
    }

    info!("Reconciliation loop stopped");
}

/// Probe service health every `interval` until shutdown
pub async fn run_health_loop(
    manager: Arc<GpuManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = new_ticker(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(&mut shutdown) => break,
        }

        tokio::select! {
            unhealthy = manager.refresh_health() => {
                if unhealthy > 0 {
                    warn!(unhealthy, "Some GPU services are unhealthy");
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }

    debug!("Health loop stopped");
}

/// Handle to the manager's background tasks
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl BackgroundTasks {
    /// Spawn the reconciliation and health loops
    pub fn spawn(
        manager: Arc<GpuManager>,
        reconcile: &ReconcileConfig,
        health: &HealthConfig,
    ) -> Self {
        Self::spawn_with(
            manager,
            reconcile.interval(),
            health.interval(),
            reconcile.shutdown_grace(),
        )
    }

    /// Spawn with explicit intervals
    pub fn spawn_with(
        manager: Arc<GpuManager>,
        reconcile_interval: Duration,
        health_interval: Duration,
        grace: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconcile = tokio::spawn(run_reconcile_loop(
            Arc::clone(&manager),
            reconcile_interval,
            shutdown_rx.clone(),
        ));
        let health = tokio::spawn(run_health_loop(manager, health_interval, shutdown_rx));

        Self {
            shutdown_tx,
            handles: vec![("reconcile", reconcile), ("health", health)],
            grace,
        }
    }

    /// Signal shutdown and wait up to the grace period, then abort stragglers
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + self.grace;

        for (name, handle) in self.handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    warn!(task = name, "Background task exceeded shutdown grace period");
                    abort.abort();
                }
            }
        }

        info!("GPU manager background tasks stopped");
    }
}
