//! Workload watchers — keep registered policies in step with Deployments
//! and StatefulSets.
//!
//! One `WorkloadSync` runs per kind. They share a `LiveWorkloads` set so
//! that a re-list of one kind never deregisters workloads of another, and
//! nothing is pruned until every kind has completed its first listing.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use kube::runtime::watcher;
use tracing::{debug, info};

use tiergate_core::{LabelConfig, WorkloadKey};
use tiergate_placement::{Workload, workload_entry};
use tiergate_registry::WorkloadRegistry;

use crate::driver::WatchHandler;

/// Workload keys currently present in the cluster, per kind.
#[derive(Debug)]
pub struct LiveWorkloads {
    kinds: Vec<&'static str>,
    live: Mutex<HashMap<&'static str, HashSet<WorkloadKey>>>,
}

impl LiveWorkloads {
    /// Track the given kinds. Pruning waits until each has listed once.
    pub fn new(kinds: &[&'static str]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            live: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, kind: &'static str, key: WorkloadKey) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.entry(kind).or_default().insert(key);
    }

    fn remove(&self, kind: &'static str, key: &WorkloadKey) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(keys) = live.get_mut(kind) {
            keys.remove(key);
        }
    }

    /// Replace one kind's live set. Returns the union over all kinds once
    /// every kind has reported a listing.
    fn replace(&self, kind: &'static str, keys: HashSet<WorkloadKey>) -> Option<HashSet<WorkloadKey>> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.insert(kind, keys);
        if !self.kinds.iter().all(|k| live.contains_key(k)) {
            return None;
        }
        Some(live.values().flatten().cloned().collect())
    }
}

/// Feeds one workload kind's events into the registry.
pub struct WorkloadSync<K> {
    registry: Arc<WorkloadRegistry>,
    labels: LabelConfig,
    live: Arc<LiveWorkloads>,
    relist: Option<HashSet<WorkloadKey>>,
    _kind: PhantomData<fn(K)>,
}

impl<K: Workload> WorkloadSync<K> {
    pub fn new(registry: Arc<WorkloadRegistry>, labels: LabelConfig, live: Arc<LiveWorkloads>) -> Self {
        Self {
            registry,
            labels,
            live,
            relist: None,
            _kind: PhantomData,
        }
    }

    fn kind() -> &'static str {
        <K as k8s_openapi::Resource>::KIND
    }

    fn upsert(&self, workload: &K) -> Option<WorkloadKey> {
        let (key, policy) = workload_entry(workload, None, &self.labels)?;
        self.registry.update_policy(&key, policy);
        Some(key)
    }
}

impl<K: Workload> WatchHandler<K> for WorkloadSync<K> {
    fn name(&self) -> &'static str {
        Self::kind()
    }

    fn handle(&mut self, event: watcher::Event<K>) {
        match event {
            watcher::Event::Init => self.relist = Some(HashSet::new()),
            watcher::Event::InitApply(workload) => {
                if let Some(key) = self.upsert(&workload) {
                    self.relist.get_or_insert_with(HashSet::new).insert(key);
                }
            }
            watcher::Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                let count = listed.len();
                match self.live.replace(Self::kind(), listed) {
                    Some(all) => {
                        let removed = self.registry.retain_workloads(&all);
                        info!(kind = Self::kind(), listed = count, removed, "workload re-list complete");
                    }
                    None => debug!(kind = Self::kind(), listed = count, "workload re-list complete, waiting for other kinds"),
                }
            }
            watcher::Event::Apply(workload) => {
                if let Some(key) = self.upsert(&workload) {
                    self.live.insert(Self::kind(), key);
                }
            }
            watcher::Event::Delete(workload) => {
                if let Some((key, _)) = workload_entry(&workload, None, &self.labels) {
                    self.live.remove(Self::kind(), &key);
                    self.registry.deregister(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use serde_json::json;
    use tiergate_core::Tier;
    use tiergate_registry::{Decision, WorkloadPolicy};

    use super::*;

    const KINDS: &[&str] = &["Deployment", "StatefulSet"];

    fn deployment(name: &str, cap: &str, replicas: i32) -> Deployment {
        serde_json::from_value(json!({
            "metadata": {
                "name": name,
                "namespace": "ns1",
                "labels": { "tiergate.io/enabled": "true", "tiergate.io/max-guaranteed": cap }
            },
            "spec": {
                "replicas": replicas,
                "selector": {},
                "template": {}
            }
        }))
        .unwrap()
    }

    fn stateful_set(name: &str) -> StatefulSet {
        serde_json::from_value(json!({
            "metadata": { "name": name, "namespace": "ns1" },
            "spec": { "selector": {}, "serviceName": name, "template": {} }
        }))
        .unwrap()
    }

    fn setup() -> (Arc<WorkloadRegistry>, WorkloadSync<Deployment>, WorkloadSync<StatefulSet>) {
        let registry = Arc::new(WorkloadRegistry::new(Duration::from_secs(300)));
        let live = Arc::new(LiveWorkloads::new(KINDS));
        let deployments = WorkloadSync::new(registry.clone(), LabelConfig::default(), live.clone());
        let stateful_sets = WorkloadSync::new(registry.clone(), LabelConfig::default(), live);
        (registry, deployments, stateful_sets)
    }

    #[test]
    fn apply_updates_policy_without_resetting_counts() {
        let (registry, mut deployments, _) = setup();
        let key = WorkloadKey::new("ns1", "web");
        registry.register(&key, WorkloadPolicy::new(1, Some(3), true));
        registry.decide_and_reserve(&key);

        deployments.handle(watcher::Event::Apply(deployment("web", "2", 4)));

        let state = registry.snapshot(&key).unwrap();
        assert_eq!(state.max_guaranteed, 2);
        assert_eq!(state.declared_replicas, 4);
        assert_eq!(state.guaranteed_count, 1);
        assert_eq!(registry.decide_and_reserve(&key), Decision::Reserved(Tier::Guaranteed));
    }

    #[test]
    fn delete_deregisters() {
        let (registry, mut deployments, _) = setup();
        deployments.handle(watcher::Event::Apply(deployment("web", "1", 1)));
        assert_eq!(registry.len(), 1);

        deployments.handle(watcher::Event::Delete(deployment("web", "1", 1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn relist_prunes_only_after_every_kind_listed() {
        let (registry, mut deployments, mut stateful_sets) = setup();
        registry.register(&WorkloadKey::new("ns1", "vanished"), WorkloadPolicy::new(1, None, true));

        deployments.handle(watcher::Event::Init);
        deployments.handle(watcher::Event::InitApply(deployment("web", "1", 2)));
        deployments.handle(watcher::Event::InitDone);
        assert_eq!(registry.len(), 2, "StatefulSets have not listed yet");

        stateful_sets.handle(watcher::Event::Init);
        stateful_sets.handle(watcher::Event::InitApply(stateful_set("db")));
        stateful_sets.handle(watcher::Event::InitDone);

        let keys: Vec<WorkloadKey> = registry.workloads().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![WorkloadKey::new("ns1", "db"), WorkloadKey::new("ns1", "web")]);
    }

    #[test]
    fn later_relist_of_one_kind_keeps_the_other() {
        let (registry, mut deployments, mut stateful_sets) = setup();
        deployments.handle(watcher::Event::Init);
        deployments.handle(watcher::Event::InitDone);
        stateful_sets.handle(watcher::Event::Init);
        stateful_sets.handle(watcher::Event::InitApply(stateful_set("db")));
        stateful_sets.handle(watcher::Event::InitDone);

        deployments.handle(watcher::Event::Apply(deployment("web", "1", 1)));
        deployments.handle(watcher::Event::Init);
        deployments.handle(watcher::Event::InitDone);

        let keys: Vec<WorkloadKey> = registry.workloads().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![WorkloadKey::new("ns1", "db")]);
    }
}
