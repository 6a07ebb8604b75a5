//! Pod watcher — the authoritative source of per-tier pod counts.
//!
//! `PodSync` keeps a ledger of live pods carrying a capacity-tier label,
//! keyed by UID. The ledger makes deltas symmetric: a pod is counted once
//! when first seen and released once when it is deleted or reaches a
//! terminal phase, however many update events arrive in between.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use tracing::{debug, info};

use tiergate_core::{Delta, LabelConfig, Tier, TierCounts, WorkloadKey};
use tiergate_placement::OwnerIndex;
use tiergate_registry::WorkloadRegistry;

use crate::driver::WatchHandler;

/// Counters describing what the pod watcher has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodSyncStats {
    pub observed: u64,
    pub released: u64,
    pub ignored: u64,
    pub relists: u64,
}

type LedgerEntry = (WorkloadKey, Tier);

/// Feeds pod lifecycle events into the registry.
pub struct PodSync {
    registry: Arc<WorkloadRegistry>,
    owners: Arc<OwnerIndex>,
    labels: LabelConfig,
    ledger: HashMap<String, LedgerEntry>,
    relist: Option<HashMap<String, LedgerEntry>>,
    stats: PodSyncStats,
}

impl PodSync {
    pub fn new(registry: Arc<WorkloadRegistry>, owners: Arc<OwnerIndex>, labels: LabelConfig) -> Self {
        Self {
            registry,
            owners,
            labels,
            ledger: HashMap::new(),
            relist: None,
            stats: PodSyncStats::default(),
        }
    }

    pub fn stats(&self) -> PodSyncStats {
        self.stats
    }

    /// Number of labelled pods currently tracked.
    pub fn tracked(&self) -> usize {
        self.ledger.len()
    }

    fn apply(&mut self, pod: Pod) {
        let Some(uid) = pod.metadata.uid.clone() else {
            return;
        };

        if is_terminal(&pod) {
            self.release(&uid);
            return;
        }

        let Some(entry) = self.classify(&pod) else {
            self.stats.ignored += 1;
            return;
        };

        match self.ledger.get(&uid).cloned() {
            Some(known) if known == entry => {}
            Some(_) => {
                // Relabelled in place: move the pod between tiers.
                self.release(&uid);
                self.observe(uid, entry);
            }
            None => self.observe(uid, entry),
        }
    }

    fn observe(&mut self, uid: String, (key, tier): LedgerEntry) {
        self.registry.observe_created(&key, tier);
        self.ledger.insert(uid, (key, tier));
        self.stats.observed += 1;
    }

    fn release(&mut self, uid: &str) {
        if let Some((key, tier)) = self.ledger.remove(uid) {
            self.registry.adjust_count(&key, tier, Delta::Decrement);
            self.stats.released += 1;
        }
    }

    fn finish_relist(&mut self) {
        let listed = self.relist.take().unwrap_or_default();

        let mut census: HashMap<WorkloadKey, TierCounts> = HashMap::new();
        for (key, tier) in listed.values() {
            census
                .entry(key.clone())
                .or_default()
                .apply(*tier, Delta::Increment);
        }

        self.ledger = listed;
        self.registry.reconcile_pods(&census);
        self.stats.relists += 1;
        info!(pods = self.ledger.len(), workloads = census.len(), "pod re-list complete");
    }

    /// The workload and tier a pod counts towards, if any.
    fn classify(&self, pod: &Pod) -> Option<LedgerEntry> {
        let value = pod.metadata.labels.as_ref()?.get(&self.labels.capacity_key)?;
        let Some(tier) = self.labels.parse_tier(value) else {
            debug!(pod = ?pod.metadata.name, %value, "unrecognized capacity label value, ignoring pod");
            return None;
        };
        let namespace = pod.metadata.namespace.as_deref()?;
        let key = self.owners.resolve_workload(namespace, &pod.metadata)?;
        Some((key, tier))
    }
}

impl WatchHandler<Pod> for PodSync {
    fn name(&self) -> &'static str {
        "pods"
    }

    fn handle(&mut self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Init => {
                debug!("pod re-list started");
                self.relist = Some(HashMap::new());
            }
            watcher::Event::InitApply(pod) => {
                if is_terminal(&pod) {
                    return;
                }
                let uid = pod.metadata.uid.clone();
                if let (Some(uid), Some(entry)) = (uid, self.classify(&pod)) {
                    self.relist.get_or_insert_with(HashMap::new).insert(uid, entry);
                }
            }
            watcher::Event::InitDone => self.finish_relist(),
            watcher::Event::Apply(pod) => self.apply(pod),
            watcher::Event::Delete(pod) => {
                if let Some(uid) = pod.metadata.uid.as_deref() {
                    self.release(uid);
                }
            }
        }
    }
}

/// Pods in `Succeeded` or `Failed` no longer occupy capacity.
fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}
