//! Registry value types.

use serde::{Deserialize, Serialize};

use tiergate_core::{Tier, TierCounts};

/// Placement policy declared on a workload's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPolicy {
    /// Cap on pods placed in the guaranteed tier.
    pub max_guaranteed: u32,
    /// Informational; the workload's declared replica count.
    pub declared_replicas: u32,
    /// Disabled workloads are exempt from capping.
    pub enabled: bool,
}

impl WorkloadPolicy {
    /// Build a policy; `declared_replicas` defaults to `max_guaranteed`.
    pub fn new(max_guaranteed: u32, declared_replicas: Option<u32>, enabled: bool) -> Self {
        Self {
            max_guaranteed,
            declared_replicas: declared_replicas.unwrap_or(max_guaranteed),
            enabled,
        }
    }
}

/// Point-in-time copy of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub max_guaranteed: u32,
    pub declared_replicas: u32,
    pub enabled: bool,
    pub guaranteed_count: u32,
    pub preemptible_count: u32,
    /// Admission-time reservations not yet observed by the pod watcher.
    /// Already included in the counts above.
    pub provisional_guaranteed: u32,
    pub provisional_preemptible: u32,
}

impl WorkloadState {
    pub(crate) fn from_parts(
        policy: &WorkloadPolicy,
        counts: &TierCounts,
        provisional: &TierCounts,
    ) -> Self {
        Self {
            max_guaranteed: policy.max_guaranteed,
            declared_replicas: policy.declared_replicas,
            enabled: policy.enabled,
            guaranteed_count: counts.guaranteed,
            preemptible_count: counts.preemptible,
            provisional_guaranteed: provisional.guaranteed,
            provisional_preemptible: provisional.preemptible,
        }
    }

    pub fn count(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Guaranteed => self.guaranteed_count,
            Tier::Preemptible => self.preemptible_count,
        }
    }

    /// Guaranteed-tier slots still available under the cap.
    pub fn guaranteed_headroom(&self) -> u32 {
        self.max_guaranteed.saturating_sub(self.guaranteed_count)
    }
}

/// Outcome of a placement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The workload is managed and a slot in `Tier` was reserved.
    Reserved(Tier),
    /// The workload is registered but capping is disabled. Nothing reserved.
    Exempt,
    /// No policy is declared for the workload. Nothing reserved.
    Unmanaged,
}

impl Decision {
    /// The tier the pod is steered to. Anything not reserved goes to the
    /// preemptible tier.
    pub fn tier(&self) -> Tier {
        match self {
            Decision::Reserved(tier) => *tier,
            Decision::Exempt | Decision::Unmanaged => Tier::Preemptible,
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Decision::Reserved(_))
    }
}
