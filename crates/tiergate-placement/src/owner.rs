//! Owner resolution — walks a pod's owner-reference chain to its workload.
//!
//! Pods created by a Deployment are owned by a ReplicaSet, which is in
//! turn owned by the Deployment. The `OwnerIndex` remembers the
//! controller of every intermediate object the ReplicaSet watcher has
//! seen, so the chain can be walked without calling the API server on the
//! admission path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::debug;

use tiergate_core::WorkloadKey;

/// Top-level controller kinds a capacity policy can be declared on.
pub const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet"];

/// Label the Deployment controller stamps on its ReplicaSets and pods.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Owner chains deeper than this are treated as unresolvable.
const MAX_CHAIN_DEPTH: usize = 8;

/// The controlling owner of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLink {
    pub kind: String,
    pub name: String,
}

impl OwnerLink {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl From<&OwnerReference> for OwnerLink {
    fn from(reference: &OwnerReference) -> Self {
        Self::new(reference.kind.clone(), reference.name.clone())
    }
}

/// Pick the controlling owner from a list of owner references.
///
/// Prefers the reference flagged `controller: true`; falls back to the
/// first reference when none is flagged.
pub fn controller_of(references: &[OwnerReference]) -> Option<OwnerLink> {
    references
        .iter()
        .find(|r| r.controller == Some(true))
        .or_else(|| references.first())
        .map(OwnerLink::from)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectRef {
    kind: String,
    namespace: String,
    name: String,
}

impl ObjectRef {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Map from intermediate controller objects to their controlling owner.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    links: RwLock<HashMap<ObjectRef, OwnerLink>>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or forget, when `owner` is `None`) the owner of an object.
    pub fn record(&self, kind: &str, namespace: &str, name: &str, owner: Option<OwnerLink>) {
        let object = ObjectRef::new(kind, namespace, name);
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        match owner {
            Some(owner) => {
                links.insert(object, owner);
            }
            None => {
                links.remove(&object);
            }
        }
    }

    pub fn remove(&self, kind: &str, namespace: &str, name: &str) {
        self.record(kind, namespace, name, None);
    }

    /// Replace the index for one kind with a fresh listing.
    ///
    /// Entries are `(namespace, name, owner)`.
    pub fn replace_kind(
        &self,
        kind: &str,
        entries: impl IntoIterator<Item = (String, String, OwnerLink)>,
    ) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.retain(|object, _| object.kind != kind);
        for (namespace, name, owner) in entries {
            links.insert(
                ObjectRef {
                    kind: kind.to_string(),
                    namespace,
                    name,
                },
                owner,
            );
        }
    }

    pub fn owner_of(&self, kind: &str, namespace: &str, name: &str) -> Option<OwnerLink> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links.get(&ObjectRef::new(kind, namespace, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the workload owning an object (normally a pod).
    ///
    /// Walks controller references through the index until a workload
    /// kind is reached. If the pod's own ReplicaSet is not indexed yet,
    /// the Deployment name is recovered by removing the exact
    /// `-<pod-template-hash>` suffix from the ReplicaSet name.
    pub fn resolve_workload(&self, namespace: &str, meta: &ObjectMeta) -> Option<WorkloadKey> {
        let mut current = controller_of(meta.owner_references.as_deref()?)?;

        for depth in 0..MAX_CHAIN_DEPTH {
            if is_workload_kind(&current.kind) {
                return Some(WorkloadKey::new(namespace, current.name));
            }

            match self.owner_of(&current.kind, namespace, &current.name) {
                Some(parent) => current = parent,
                None if depth == 0 => {
                    let name = deployment_from_template_hash(&current, meta.labels.as_ref())?;
                    debug!(
                        %namespace,
                        replica_set = %current.name,
                        deployment = %name,
                        "owner not indexed, resolved from pod-template-hash"
                    );
                    return Some(WorkloadKey::new(namespace, name));
                }
                None => {
                    debug!(%namespace, kind = %current.kind, name = %current.name, "owner chain ends outside a workload");
                    return None;
                }
            }
        }

        debug!(%namespace, "owner chain too deep");
        None
    }
}

pub fn is_workload_kind(kind: &str) -> bool {
    WORKLOAD_KINDS.contains(&kind)
}

fn deployment_from_template_hash(
    owner: &OwnerLink,
    labels: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    if owner.kind != "ReplicaSet" {
        return None;
    }
    let hash = labels?.get(POD_TEMPLATE_HASH_LABEL)?;
    owner
        .name
        .strip_suffix(hash.as_str())?
        .strip_suffix('-')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
