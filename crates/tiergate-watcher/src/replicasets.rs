//! ReplicaSet watcher — feeds the owner index used on the admission path.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::runtime::watcher;
use tracing::{debug, info};

use tiergate_placement::{OwnerIndex, OwnerLink, controller_of};

use crate::driver::WatchHandler;

const KIND: &str = "ReplicaSet";

/// Records each ReplicaSet's controlling owner in the `OwnerIndex`.
pub struct ReplicaSetSync {
    owners: Arc<OwnerIndex>,
    relist: Option<Vec<(String, String, OwnerLink)>>,
}

impl ReplicaSetSync {
    pub fn new(owners: Arc<OwnerIndex>) -> Self {
        Self {
            owners,
            relist: None,
        }
    }
}

/// `(namespace, name, owner)` of a ReplicaSet with a controller.
fn link(rs: &ReplicaSet) -> Option<(String, String, OwnerLink)> {
    let meta = &rs.metadata;
    let owner = controller_of(meta.owner_references.as_deref()?)?;
    Some((meta.namespace.clone()?, meta.name.clone()?, owner))
}

impl WatchHandler<ReplicaSet> for ReplicaSetSync {
    fn name(&self) -> &'static str {
        "replicasets"
    }

    fn handle(&mut self, event: watcher::Event<ReplicaSet>) {
        match event {
            watcher::Event::Init => self.relist = Some(Vec::new()),
            watcher::Event::InitApply(rs) => {
                if let Some(entry) = link(&rs) {
                    self.relist.get_or_insert_with(Vec::new).push(entry);
                }
            }
            watcher::Event::InitDone => {
                let entries = self.relist.take().unwrap_or_default();
                let count = entries.len();
                self.owners.replace_kind(KIND, entries);
                info!(replica_sets = count, "owner index rebuilt");
            }
            watcher::Event::Apply(rs) => {
                let (Some(namespace), Some(name)) = (rs.metadata.namespace.as_deref(), rs.metadata.name.as_deref()) else {
                    return;
                };
                let owner = rs.metadata.owner_references.as_deref().and_then(controller_of);
                debug!(%namespace, %name, owner = ?owner.as_ref().map(|o| &o.name), "replica set indexed");
                self.owners.record(KIND, namespace, name, owner);
            }
            watcher::Event::Delete(rs) => {
                if let (Some(namespace), Some(name)) = (rs.metadata.namespace.as_deref(), rs.metadata.name.as_deref()) {
                    self.owners.remove(KIND, namespace, name);
                }
            }
        }
    }
}
