//! GPU manager: the allocation API
//!
//! `GpuManager` owns the device snapshot and the allocation ledger behind a
//! single mutex. Request, release, status and every reconciliation pass are
//! independent critical sections; telemetry and health I/O always happen
//! outside the lock.

use chrono::{DateTime, Utc};
use gpumgr_core::{
    AllocationGrant, AllocationId, AllocationRequest, AllocationView, GpuDevice, GpuInventory,
    GpuMgrError, GpuMgrResult, ServiceKind,
};
use gpumgr_health::{HealthChecker, ServiceHealth};
use gpumgr_telemetry::TelemetryProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::ledger::AllocationLedger;
use crate::policy;

/// State guarded by the manager lock
#[derive(Debug, Default)]
pub struct ManagerState {
    /// Last known-good device snapshot, `None` until a poll succeeds
    pub inventory: Option<GpuInventory>,
    /// Allocation ledger
    pub ledger: AllocationLedger,
}

impl ManagerState {
    /// Snapshot with at least one device, if any
    fn devices(&self) -> Option<&GpuInventory> {
        self.inventory.as_ref().filter(|inv| !inv.is_empty())
    }
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Allocation found; remaining active requests
    Released { remaining: u32 },
    /// No such allocation (never issued or already evicted)
    Unknown,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub telemetry_ok: bool,
    pub evicted: Vec<AllocationId>,
    pub rebalanced: usize,
}

/// Read-only observability snapshot
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub devices: Vec<GpuDevice>,
    pub allocations: Vec<AllocationView>,
    pub total_capacity_mb: u64,
    pub observed_at: Option<DateTime<Utc>>,
    pub services: Vec<ServiceHealth>,
}

impl ManagerStatus {
    /// Number of allocations with active requests
    pub fn active_allocations(&self) -> usize {
        self.allocations
            .iter()
            .filter(|a| a.active_requests > 0)
            .count()
    }
}

/// Advisory GPU allocator shared by the REST layer and the background tasks
pub struct GpuManager {
    /// Device snapshot and ledger
    state: Mutex<ManagerState>,
    /// Inventory source
    telemetry: Arc<dyn TelemetryProvider>,
    /// Probe for dependent services
    health: HealthChecker,
    /// Last probe result per service
    service_health: RwLock<HashMap<ServiceKind, ServiceHealth>>,
    /// Idle time after which an allocation is evicted
    stale_timeout: Duration,
}

impl GpuManager {
    /// Create a new manager. No telemetry is read until `initialize`.
    pub fn new(
        telemetry: Arc<dyn TelemetryProvider>,
        health: HealthChecker,
        stale_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            telemetry,
            health,
            service_health: RwLock::new(HashMap::new()),
            stale_timeout,
        }
    }

    /// Take the first device snapshot
    pub async fn initialize(&self) {
        let _ = self.refresh_telemetry().await;

        let state = self.state.lock().await;
        let (gpus, total) = state
            .inventory
            .as_ref()
            .map(|inv| (inv.devices.len(), inv.total_memory_mb()))
            .unwrap_or((0, 0));

        info!(
            provider = self.telemetry.name(),
            gpus,
            total_vram_mb = total,
            "GPU manager initialized"
        );
    }

    /// Run `f` inside the manager's critical section
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    /// Poll telemetry and swap in the new snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn refresh_telemetry(&self) -> GpuMgrResult<usize> {
        let polled = self.telemetry.poll().await;
        let mut state = self.state.lock().await;
        apply_poll(&mut state, polled)
    }

    /// Request GPU resources for a task.
    ///
    /// Decides from the last device snapshot only; the reconciliation loop
    /// keeps it fresh, so a slow or failing telemetry source never delays a
    /// request.
    pub async fn request(&self, request: AllocationRequest) -> GpuMgrResult<AllocationGrant> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let inventory = state
            .inventory
            .as_ref()
            .filter(|inv| !inv.is_empty())
            .ok_or_else(|| GpuMgrError::ResourceUnavailable("No GPUs available".to_string()))?;

        let grant = policy::decide_grant(
            &request,
            &state.ledger.active_completions(),
            inventory.primary_free_memory_mb(),
            inventory.total_memory_mb(),
        );

        let gpu_indices = if grant.exclusive {
            inventory.indices()
        } else {
            inventory.primary_index().into_iter().collect()
        };

        let id = state
            .ledger
            .insert(&request, gpu_indices.clone(), grant.memory_limit_mb, now);

        info!(
            allocation_id = %id,
            service = %request.service,
            priority = %request.priority,
            memory_limit_mb = grant.memory_limit_mb,
            wait_time_s = grant.wait_time_s,
            "Allocated GPU memory"
        );

        Ok(AllocationGrant {
            id,
            gpu_indices,
            memory_limit_mb: grant.memory_limit_mb,
            wait_time_s: grant.wait_time_s,
        })
    }

    /// Release one request against an allocation.
    ///
    /// Unknown ids are tolerated: callers may race with stale cleanup.
    pub async fn release(&self, id: &AllocationId) -> ReleaseOutcome {
        let now = Instant::now();
        let remaining = self.state.lock().await.ledger.release(id, now);

        match remaining {
            Ok(remaining) => {
                info!(allocation_id = %id, remaining, "Released allocation");
                ReleaseOutcome::Released { remaining }
            }
            Err(e) => {
                warn!(error = %e, "Ignoring release");
                ReleaseOutcome::Unknown
            }
        }
    }

    /// Current devices, allocations and service health
    pub async fn status(&self) -> ManagerStatus {
        let now = Instant::now();
        let (devices, allocations, total_capacity_mb, observed_at) = {
            let state = self.state.lock().await;
            let (devices, total, observed_at) = match state.inventory.as_ref() {
                Some(inv) => (
                    inv.devices.clone(),
                    inv.total_memory_mb(),
                    Some(inv.observed_at),
                ),
                None => (Vec::new(), 0, None),
            };
            let allocations = state.ledger.all().iter().map(|a| a.view(now)).collect();
            (devices, allocations, total, observed_at)
        };

        let mut services: Vec<ServiceHealth> =
            self.service_health.read().await.values().cloned().collect();
        services.sort_by_key(|h| h.service);

        ManagerStatus {
            devices,
            allocations,
            total_capacity_mb,
            observed_at,
            services,
        }
    }

    /// Number of devices in the current snapshot
    pub async fn device_count(&self) -> usize {
        self.state
            .lock()
            .await
            .inventory
            .as_ref()
            .map(|inv| inv.devices.len())
            .unwrap_or(0)
    }

    /// One reconciliation pass at the current time
    pub async fn reconcile_once(&self) -> ReconcileReport {
        self.reconcile_at(Instant::now()).await
    }

    /// One reconciliation pass: refresh telemetry, evict stale allocations,
    /// rebalance the active ones. Ledger changes are applied atomically.
    pub async fn reconcile_at(&self, now: Instant) -> ReconcileReport {
        let polled = self.telemetry.poll().await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let telemetry_ok = apply_poll(state, polled).is_ok();
        let evicted = state.ledger.evict_stale(now, self.stale_timeout);
        for id in &evicted {
            info!(allocation_id = %id, "Cleaning up stale allocation");
        }

        let assignments = match state.devices() {
            Some(inventory) => policy::rebalance(
                &state.ledger.active(),
                inventory.total_memory_mb(),
                &inventory.indices(),
            ),
            None => Vec::new(),
        };
        state.ledger.apply(&assignments);

        if assignments.len() > 1 {
            let split: Vec<String> = assignments
                .iter()
                .map(|a| format!("{}={}MB", a.id, a.memory_limit_mb))
                .collect();
            info!(allocations = ?split, "Rebalanced allocations");
        }

        ReconcileReport {
            telemetry_ok,
            evicted,
            rebalanced: assignments.len(),
        }
    }

    /// Probe one service and cache the result
    pub async fn check_service_health(&self, service: ServiceKind) -> bool {
        let health = self.health.check(service).await;
        let healthy = health.healthy;
        self.service_health.write().await.insert(service, health);
        healthy
    }

    /// Probe every service and cache the results. Returns the unhealthy count.
    pub async fn refresh_health(&self) -> usize {
        let results = self.health.check_all().await;
        let unhealthy = results.iter().filter(|h| !h.healthy).count();

        let mut cache = self.service_health.write().await;
        for health in results {
            cache.insert(health.service, health);
        }

        debug!(unhealthy, "Service health refreshed");
        unhealthy
    }
}

/// Swap in a successful poll; keep the previous snapshot on failure
fn apply_poll(
    state: &mut ManagerState,
    polled: GpuMgrResult<Vec<GpuDevice>>,
) -> GpuMgrResult<usize> {
    match polled {
        Ok(devices) => {
            let count = devices.len();
            state.inventory = Some(GpuInventory::new(devices));
            Ok(count)
        }
        Err(e) => {
            warn!(
                error = %e,
                has_snapshot = state.inventory.is_some(),
                "Error refreshing GPU info"
            );
            Err(e)
        }
    }
}
