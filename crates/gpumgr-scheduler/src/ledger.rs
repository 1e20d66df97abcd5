//! Allocation ledger
//!
//! In-memory map of allocation id to allocation record. The ledger does no
//! locking and no I/O; `GpuManager` keeps it behind the same mutex as the
//! device snapshot so every mutation is a single critical section.

use chrono::Utc;
use gpumgr_core::{Allocation, AllocationId, AllocationRequest, GpuMgrError, GpuMgrResult};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::policy::Assignment;

/// Allocation ledger, the single source of truth for claims on the GPU
#[derive(Debug, Default)]
pub struct AllocationLedger {
    allocations: HashMap<AllocationId, Allocation>,
    /// Last issued sequence number
    last_seq: u64,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new allocation with one active request and return its id
    pub fn insert(
        &mut self,
        request: &AllocationRequest,
        gpu_indices: Vec<u32>,
        memory_limit_mb: u64,
        now: Instant,
    ) -> AllocationId {
        self.last_seq += 1;
        let id = AllocationId::new(request.service, self.last_seq);

        let allocation = Allocation {
            id: id.clone(),
            seq: self.last_seq,
            service: request.service,
            gpu_indices,
            memory_limit_mb,
            priority: request.priority,
            active_requests: 1,
            estimated_completion_s: request.estimated_duration_s,
            last_activity: now,
            created_at: Utc::now(),
            workflow_type: request.workflow_type.clone(),
            pipeline_id: request.pipeline_id.clone(),
        };

        self.allocations.insert(id.clone(), allocation);
        id
    }

    pub fn get(&self, id: &AllocationId) -> Option<&Allocation> {
        self.allocations.get(id)
    }

    /// Drop one active request and return the remaining count
    pub fn release(&mut self, id: &AllocationId, now: Instant) -> GpuMgrResult<u32> {
        let allocation = self
            .allocations
            .get_mut(id)
            .ok_or_else(|| GpuMgrError::UnknownAllocation(id.to_string()))?;
        allocation.active_requests = allocation.active_requests.saturating_sub(1);
        allocation.last_activity = now;
        Ok(allocation.active_requests)
    }

    /// Remove idle allocations older than `timeout`, returning their ids
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<AllocationId> {
        let stale: Vec<AllocationId> = self
            .allocations
            .values()
            .filter(|a| a.is_stale(now, timeout))
            .map(|a| a.id.clone())
            .collect();

        for id in &stale {
            self.allocations.remove(id);
            debug!(allocation_id = %id, "Evicted stale allocation");
        }

        stale
    }

    /// Allocations with at least one active request, oldest first
    pub fn active(&self) -> Vec<&Allocation> {
        let mut active: Vec<&Allocation> =
            self.allocations.values().filter(|a| a.is_active()).collect();
        active.sort_by_key(|a| a.seq);
        active
    }

    /// Estimated completion times of the active allocations
    pub fn active_completions(&self) -> Vec<f64> {
        self.active()
            .iter()
            .map(|a| a.estimated_completion_s)
            .collect()
    }

    /// Write rebalance results. Only the limit and device set are touched.
    pub fn apply(&mut self, assignments: &[Assignment]) {
        for assignment in assignments {
            if let Some(allocation) = self.allocations.get_mut(&assignment.id) {
                allocation.memory_limit_mb = assignment.memory_limit_mb;
                if let Some(indices) = &assignment.gpu_indices {
                    allocation.gpu_indices = indices.clone();
                }
            }
        }
    }

    /// Snapshot of every allocation, oldest first
    pub fn all(&self) -> Vec<Allocation> {
        let mut all: Vec<Allocation> = self.allocations.values().cloned().collect();
        all.sort_by_key(|a| a.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}
