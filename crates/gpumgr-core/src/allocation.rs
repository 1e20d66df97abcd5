//! Allocation records and request payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::{Priority, ServiceKind};

/// Identifier of an allocation, `alloc-<service>-<seq>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(String);

impl AllocationId {
    /// Build the id for the `seq`-th allocation of the process
    pub fn new(service: ServiceKind, seq: u64) -> Self {
        Self(format!("alloc-{}-{}", service.as_str(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AllocationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AllocationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request for GPU resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Requesting service
    pub service: ServiceKind,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
    /// Estimated VRAM needed in MB
    #[serde(default = "default_estimated_vram_mb")]
    pub estimated_vram_mb: u64,
    /// Estimated task duration in seconds
    #[serde(default = "default_estimated_duration_s")]
    pub estimated_duration_s: f64,
    /// Free-form workflow label
    #[serde(default)]
    pub workflow_type: Option<String>,
    /// Pipeline the task belongs to
    #[serde(default)]
    pub pipeline_id: Option<String>,
}

fn default_estimated_vram_mb() -> u64 {
    4000
}

fn default_estimated_duration_s() -> f64 {
    30.0
}

impl AllocationRequest {
    /// Create a request with default estimates
    pub fn new(service: ServiceKind, priority: Priority) -> Self {
        Self {
            service,
            priority,
            estimated_vram_mb: default_estimated_vram_mb(),
            estimated_duration_s: default_estimated_duration_s(),
            workflow_type: None,
            pipeline_id: None,
        }
    }

    pub fn with_vram(mut self, estimated_vram_mb: u64) -> Self {
        self.estimated_vram_mb = estimated_vram_mb;
        self
    }

    pub fn with_duration(mut self, estimated_duration_s: f64) -> Self {
        self.estimated_duration_s = estimated_duration_s;
        self
    }
}

/// Outcome of a successful allocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationGrant {
    pub id: AllocationId,
    pub gpu_indices: Vec<u32>,
    pub memory_limit_mb: u64,
    /// Advisory backoff before the caller should expect the memory to be free
    pub wait_time_s: f64,
}

/// Ledger entry: one service's advisory claim on GPU resources
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: AllocationId,
    /// Monotonic sequence number, never reused
    pub seq: u64,
    pub service: ServiceKind,
    pub gpu_indices: Vec<u32>,
    pub memory_limit_mb: u64,
    pub priority: Priority,
    pub active_requests: u32,
    pub estimated_completion_s: f64,
    pub last_activity: Instant,
    pub created_at: DateTime<Utc>,
    pub workflow_type: Option<String>,
    pub pipeline_id: Option<String>,
}

impl Allocation {
    /// Whether the allocation currently serves requests
    pub fn is_active(&self) -> bool {
        self.active_requests > 0
    }

    /// Whether the allocation has been idle longer than `timeout` at `now`
    pub fn is_stale(&self, now: Instant, timeout: std::time::Duration) -> bool {
        !self.is_active() && now.saturating_duration_since(self.last_activity) > timeout
    }

    /// Serializable view of this allocation
    pub fn view(&self, now: Instant) -> AllocationView {
        AllocationView {
            id: self.id.clone(),
            service: self.service,
            gpu_indices: self.gpu_indices.clone(),
            memory_limit_mb: self.memory_limit_mb,
            priority: self.priority.as_str().to_string(),
            active_requests: self.active_requests,
            estimated_completion_s: self.estimated_completion_s,
            idle_secs: now.saturating_duration_since(self.last_activity).as_secs_f64(),
            workflow_type: self.workflow_type.clone(),
            pipeline_id: self.pipeline_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only view of an allocation for status responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationView {
    pub id: AllocationId,
    pub service: ServiceKind,
    pub gpu_indices: Vec<u32>,
    pub memory_limit_mb: u64,
    pub priority: String,
    pub active_requests: u32,
    pub estimated_completion_s: f64,
    pub idle_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn allocation(active_requests: u32) -> Allocation {
        Allocation {
            id: AllocationId::new(ServiceKind::InferenceServer, 1),
            seq: 1,
            service: ServiceKind::InferenceServer,
            gpu_indices: vec![0],
            memory_limit_mb: 8000,
            priority: Priority::Normal,
            active_requests,
            estimated_completion_s: 30.0,
            last_activity: Instant::now(),
            created_at: Utc::now(),
            workflow_type: None,
            pipeline_id: None,
        }
    }

    #[test]
    fn test_allocation_id_format() {
        let id = AllocationId::new(ServiceKind::InferenceServer, 999);
        assert_eq!(id.as_str(), "alloc-ollama-999");
        assert_eq!(id, AllocationId::from("alloc-ollama-999"));
    }

    #[test]
    fn test_request_defaults() {
        let req: AllocationRequest = serde_json::from_str(r#"{"service": "whisper"}"#).unwrap();
        assert_eq!(req.service, ServiceKind::SpeechToText);
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.estimated_vram_mb, 4000);
        assert_eq!(req.estimated_duration_s, 30.0);
        assert!(req.pipeline_id.is_none());
    }

    #[test]
    fn test_staleness() {
        let alloc = allocation(0);
        let timeout = Duration::from_secs(300);
        assert!(!alloc.is_stale(alloc.last_activity + Duration::from_secs(300), timeout));
        assert!(alloc.is_stale(alloc.last_activity + Duration::from_secs(301), timeout));

        let busy = allocation(2);
        assert!(!busy.is_stale(busy.last_activity + Duration::from_secs(3600), timeout));
    }

    #[test]
    fn test_view_reports_priority_name() {
        let alloc = allocation(1);
        let view = alloc.view(alloc.last_activity);
        assert_eq!(view.priority, "NORMAL");
        assert_eq!(view.idle_secs, 0.0);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], "alloc-ollama-1");
        assert_eq!(json["service"], "ollama");
        assert!(json.get("workflow_type").is_none());
    }
}
