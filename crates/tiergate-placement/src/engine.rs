//! Decision engine — maps an admitted pod to a tier.
//!
//! `decide` has exactly one side effect: the registry reservation. It
//! must be called once per admitted pod. Dry-run admissions use
//! `preview`, which makes the same decision without reserving.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use tiergate_core::WorkloadKey;
use tiergate_registry::{Decision, WorkloadRegistry};

use crate::owner::OwnerIndex;

/// Resolves a pod's workload and consults the registry.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    registry: Arc<WorkloadRegistry>,
    owners: Arc<OwnerIndex>,
}

impl DecisionEngine {
    pub fn new(registry: Arc<WorkloadRegistry>, owners: Arc<OwnerIndex>) -> Self {
        Self { registry, owners }
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    pub fn owners(&self) -> &Arc<OwnerIndex> {
        &self.owners
    }

    /// The workload owning `pod`, if it has one.
    pub fn resolve(&self, namespace: &str, pod: &Pod) -> Option<WorkloadKey> {
        self.owners.resolve_workload(namespace, &pod.metadata)
    }

    /// Decide the pod's tier and reserve it.
    pub fn decide(&self, namespace: &str, pod: &Pod) -> Decision {
        match self.resolve(namespace, pod) {
            Some(key) => self.registry.decide_and_reserve(&key),
            None => {
                debug!(
                    %namespace,
                    pod = pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()).unwrap_or(""),
                    "no owning workload, pod is unmanaged"
                );
                Decision::Unmanaged
            }
        }
    }

    /// The decision `decide` would make, without reserving anything.
    pub fn preview(&self, namespace: &str, pod: &Pod) -> Decision {
        match self.resolve(namespace, pod) {
            Some(key) => self.registry.peek(&key),
            None => Decision::Unmanaged,
        }
    }
}
