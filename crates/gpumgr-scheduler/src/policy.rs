//! Allocation policy
//!
//! Pure decision functions: given the current capacity and the set of active
//! allocations, decide how much VRAM a new request gets and how capacity is
//! split when several services are active. Nothing here touches the ledger;
//! callers apply the returned decisions under the manager lock.

use gpumgr_core::{Allocation, AllocationId, AllocationRequest, Priority};
use std::cmp::Ordering;

/// Share of the remaining capacity given to a high-priority allocation
const HIGH_PRIORITY_SHARE: f64 = 0.6;

/// Grant decision for a new request
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// Advisory VRAM cap in MB
    pub memory_limit_mb: u64,
    /// Expected wait before the requested memory frees up
    pub wait_time_s: f64,
    /// Whether the request has the GPU to itself
    pub exclusive: bool,
}

/// Rebalance result for one allocation
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: AllocationId,
    pub memory_limit_mb: u64,
    /// New device set, `None` keeps the current one
    pub gpu_indices: Option<Vec<u32>>,
}

/// Decide the initial grant for `request`.
///
/// `active_completions` holds the estimated completion time of every
/// allocation that currently has active requests; `available_vram_mb` is
/// the free memory on the primary device.
pub fn decide_grant(
    request: &AllocationRequest,
    active_completions: &[f64],
    available_vram_mb: u64,
    total_capacity_mb: u64,
) -> Grant {
    if active_completions.is_empty() {
        return Grant {
            memory_limit_mb: total_capacity_mb,
            wait_time_s: 0.0,
            exclusive: true,
        };
    }

    let profile = request.service.profile();
    let memory_limit_mb = request
        .estimated_vram_mb
        .min(available_vram_mb)
        .min(profile.max_mb);

    let wait_time_s = if request.estimated_vram_mb > available_vram_mb {
        active_completions.iter().sum::<f64>() / active_completions.len() as f64
    } else {
        0.0
    };

    Grant {
        memory_limit_mb,
        wait_time_s,
        exclusive: false,
    }
}

/// Greedy precedence order: priority, then busiest first, then oldest first
fn precedence(a: &Allocation, b: &Allocation) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.active_requests.cmp(&a.active_requests))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Split `total_capacity_mb` among the active allocations.
///
/// A lone active allocation gets the whole capacity and every device.
/// Otherwise allocations are walked in precedence order, each taking a share
/// of what is left; a share is never below the service's profile minimum, so
/// the running total may be overcommitted.
pub fn rebalance(
    active: &[&Allocation],
    total_capacity_mb: u64,
    device_indices: &[u32],
) -> Vec<Assignment> {
    match active {
        [] => Vec::new(),
        [only] => vec![Assignment {
            id: only.id.clone(),
            memory_limit_mb: total_capacity_mb,
            gpu_indices: Some(device_indices.to_vec()),
        }],
        _ => split(active, total_capacity_mb),
    }
}

fn split(active: &[&Allocation], total_capacity_mb: u64) -> Vec<Assignment> {
    let mut ordered: Vec<&Allocation> = active.to_vec();
    ordered.sort_by(|a, b| precedence(a, b));

    let count = ordered.len();
    let mut available = total_capacity_mb as i64;
    let mut assignments = Vec::with_capacity(count);

    for (position, allocation) in ordered.into_iter().enumerate() {
        let profile = allocation.service.profile();
        let default_mb = profile.default_mb as i64;

        let share = match allocation.priority {
            Priority::Critical => default_mb.min(available),
            Priority::High => {
                default_mb.min((available as f64 * HIGH_PRIORITY_SHARE).floor() as i64)
            }
            Priority::Normal | Priority::Low | Priority::Batch => {
                let remaining = (count - position).max(1) as i64;
                default_mb.min(available.div_euclid(remaining))
            }
        };

        let grant = share.max(profile.min_mb as i64);
        available -= grant;

        assignments.push(Assignment {
            id: allocation.id.clone(),
            memory_limit_mb: grant as u64,
            gpu_indices: None,
        });
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gpumgr_core::ServiceKind;
    use std::time::Instant;

    fn allocation(seq: u64, service: ServiceKind, priority: Priority, active: u32) -> Allocation {
        Allocation {
            id: AllocationId::new(service, seq),
            seq,
            service,
            gpu_indices: vec![0],
            memory_limit_mb: 0,
            priority,
            active_requests: active,
            estimated_completion_s: 30.0,
            last_activity: Instant::now(),
            created_at: Utc::now(),
            workflow_type: None,
            pipeline_id: None,
        }
    }

    fn limit_of(assignments: &[Assignment], id: &AllocationId) -> u64 {
        assignments
            .iter()
            .find(|a| &a.id == id)
            .map(|a| a.memory_limit_mb)
            .unwrap()
    }

    #[test]
    fn test_first_request_gets_whole_device() {
        let request = AllocationRequest::new(ServiceKind::InferenceServer, Priority::Normal)
            .with_vram(8000);
        let grant = decide_grant(&request, &[], 24000, 24000);
        assert_eq!(
            grant,
            Grant {
                memory_limit_mb: 24000,
                wait_time_s: 0.0,
                exclusive: true
            }
        );
    }

    #[test]
    fn test_shared_grant_is_capped_and_waits() {
        let request = AllocationRequest::new(ServiceKind::ImageGeneration, Priority::Normal)
            .with_vram(10000);
        let grant = decide_grant(&request, &[20.0, 40.0], 6000, 24000);
        assert_eq!(grant.memory_limit_mb, 6000);
        assert_eq!(grant.wait_time_s, 30.0);
        assert!(!grant.exclusive);
    }

    #[test]
    fn test_shared_grant_respects_profile_max_without_floor() {
        let request = AllocationRequest::new(ServiceKind::SpeechToText, Priority::Normal)
            .with_vram(9000);
        let grant = decide_grant(&request, &[10.0], 20000, 24000);
        assert_eq!(grant.memory_limit_mb, 6000);
        assert_eq!(grant.wait_time_s, 0.0);

        // Below profile.min is granted as asked at request time
        let tiny = AllocationRequest::new(ServiceKind::VideoGeneration, Priority::Normal)
            .with_vram(500);
        assert_eq!(decide_grant(&tiny, &[10.0], 20000, 24000).memory_limit_mb, 500);
    }

    #[test]
    fn test_rebalance_nothing_active() {
        assert!(rebalance(&[], 24000, &[0]).is_empty());
    }

    #[test]
    fn test_single_tenant_gets_everything() {
        let only = allocation(1, ServiceKind::SpeechToText, Priority::Batch, 3);
        let assignments = rebalance(&[&only], 48000, &[0, 1]);
        assert_eq!(
            assignments,
            vec![Assignment {
                id: only.id.clone(),
                memory_limit_mb: 48000,
                gpu_indices: Some(vec![0, 1]),
            }]
        );
    }

    #[test]
    fn test_critical_not_below_normal() {
        let normal = allocation(1, ServiceKind::InferenceServer, Priority::Normal, 1);
        let critical = allocation(2, ServiceKind::InferenceServer, Priority::Critical, 1);

        for total in [4000, 12000, 24000, 48000] {
            let assignments = rebalance(&[&normal, &critical], total, &[0]);
            assert!(
                limit_of(&assignments, &critical.id) >= limit_of(&assignments, &normal.id),
                "total {}",
                total
            );
        }
    }

    #[test]
    fn test_high_takes_sixty_percent_capped_at_default() {
        let high = allocation(1, ServiceKind::ImageGeneration, Priority::High, 1);
        let normal = allocation(2, ServiceKind::InferenceServer, Priority::Normal, 1);

        // 60% of 12000 = 7200 < default 10000
        let assignments = rebalance(&[&normal, &high], 12000, &[0]);
        assert_eq!(limit_of(&assignments, &high.id), 7200);
        // remaining 4800 to the last allocation
        assert_eq!(limit_of(&assignments, &normal.id), 4800);

        let assignments = rebalance(&[&normal, &high], 24000, &[0]);
        assert_eq!(limit_of(&assignments, &high.id), 10000);
        assert_eq!(limit_of(&assignments, &normal.id), 8000);
        assert!(assignments.iter().all(|a| a.gpu_indices.is_none()));
    }

    #[test]
    fn test_equal_split_among_normals() {
        let a = allocation(1, ServiceKind::InferenceServer, Priority::Normal, 1);
        let b = allocation(2, ServiceKind::InferenceServer, Priority::Low, 1);
        let c = allocation(3, ServiceKind::InferenceServer, Priority::Batch, 1);

        let assignments = rebalance(&[&c, &b, &a], 12000, &[0]);
        for alloc in [&a, &b, &c] {
            assert_eq!(limit_of(&assignments, &alloc.id), 4000);
        }
    }

    #[test]
    fn test_min_clamp_may_overcommit() {
        let video = allocation(1, ServiceKind::VideoGeneration, Priority::Critical, 1);
        let whisper = allocation(2, ServiceKind::SpeechToText, Priority::Normal, 1);
        let ollama = allocation(3, ServiceKind::InferenceServer, Priority::Low, 1);

        let assignments = rebalance(&[&whisper, &video, &ollama], 16000, &[0]);
        assert_eq!(limit_of(&assignments, &video.id), 16000);
        assert_eq!(limit_of(&assignments, &whisper.id), 1500);
        assert_eq!(limit_of(&assignments, &ollama.id), 2000);
    }

    #[test]
    fn test_busier_allocation_goes_first() {
        let quiet = allocation(1, ServiceKind::InferenceServer, Priority::Normal, 1);
        let busy = allocation(2, ServiceKind::InferenceServer, Priority::Normal, 5);

        // 10000 split: busy takes 10000/2 = 5000, quiet takes the rest
        let assignments = rebalance(&[&quiet, &busy], 10000, &[0]);
        assert_eq!(assignments[0].id, busy.id);
        assert_eq!(assignments[1].id, quiet.id);
    }

    #[test]
    fn test_rebalance_is_deterministic() {
        let a = allocation(1, ServiceKind::ImageGeneration, Priority::Normal, 2);
        let b = allocation(2, ServiceKind::ImageGeneration, Priority::Normal, 2);
        let c = allocation(3, ServiceKind::SpeechToText, Priority::High, 1);

        let first = rebalance(&[&a, &b, &c], 20000, &[0]);
        let second = rebalance(&[&c, &b, &a], 20000, &[0]);
        assert_eq!(first, second);
    }
}
