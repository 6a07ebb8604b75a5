//! JSON patch generation for admitted pods.
//!
//! The patch pins the pod to nodes of its tier through a required
//! node-affinity expression, merged into whatever affinity the pod
//! already declares. It also labels the pod with its tier and, when
//! configured, sets the pod-deletion-cost annotation.

use k8s_openapi::api::core::v1::{NodeSelectorTerm, Pod};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use tiergate_core::{LabelConfig, PatchConfig, Tier};

/// Annotation the ReplicaSet controller consults when scaling down.
pub const DELETION_COST_ANNOTATION: &str = "controller.kubernetes.io/pod-deletion-cost";

const REQUIRED_PATH: &str = "/spec/affinity/nodeAffinity/requiredDuringSchedulingIgnoredDuringExecution";

/// A single RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } => path,
        }
    }
}

/// Builds placement patches from the configured label keys.
#[derive(Debug, Clone, Default)]
pub struct PatchGenerator {
    labels: LabelConfig,
    patch: PatchConfig,
}

impl PatchGenerator {
    pub fn new(labels: LabelConfig, patch: PatchConfig) -> Self {
        Self { labels, patch }
    }

    /// Operations placing `pod` in `tier`.
    pub fn placement_patch(&self, pod: &Pod, tier: Tier) -> Vec<PatchOperation> {
        let mut ops = self.affinity_ops(pod, tier);

        ops.push(map_entry_op(
            "/metadata/labels",
            pod.metadata.labels.is_some(),
            &self.labels.capacity_key,
            self.labels.tier_value(tier),
        ));

        if self.patch.deletion_cost {
            ops.push(map_entry_op(
                "/metadata/annotations",
                pod.metadata.annotations.is_some(),
                DELETION_COST_ANNOTATION,
                &self.patch.deletion_cost_for(tier).to_string(),
            ));
        }

        ops
    }

    /// Serialize operations as a JSON patch document.
    pub fn encode(ops: &[PatchOperation]) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(ops)
    }

    fn requirement(&self, tier: Tier) -> Value {
        json!({
            "key": self.labels.capacity_key,
            "operator": "In",
            "values": [self.labels.tier_value(tier)],
        })
    }

    fn affinity_ops(&self, pod: &Pod, tier: Tier) -> Vec<PatchOperation> {
        let requirement = self.requirement(tier);
        let term = json!({ "matchExpressions": [requirement.clone()] });
        let required = json!({ "nodeSelectorTerms": [term.clone()] });

        let Some(spec) = pod.spec.as_ref() else {
            return vec![add(
                "/spec",
                json!({ "affinity": { "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": required,
                } } }),
            )];
        };
        let Some(affinity) = spec.affinity.as_ref() else {
            return vec![add(
                "/spec/affinity",
                json!({ "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": required,
                } }),
            )];
        };
        let Some(node_affinity) = affinity.node_affinity.as_ref() else {
            return vec![add(
                "/spec/affinity/nodeAffinity",
                json!({ "requiredDuringSchedulingIgnoredDuringExecution": required }),
            )];
        };
        let Some(selector) = node_affinity
            .required_during_scheduling_ignored_during_execution
            .as_ref()
        else {
            return vec![add(REQUIRED_PATH, required)];
        };

        if selector.node_selector_terms.is_empty() {
            return vec![add(&format!("{REQUIRED_PATH}/nodeSelectorTerms/-"), term)];
        }

        selector
            .node_selector_terms
            .iter()
            .enumerate()
            .map(|(i, existing)| self.term_op(i, existing, &requirement))
            .collect()
    }

    fn term_op(&self, index: usize, term: &NodeSelectorTerm, requirement: &Value) -> PatchOperation {
        let base = format!("{REQUIRED_PATH}/nodeSelectorTerms/{index}/matchExpressions");
        let Some(expressions) = term.match_expressions.as_ref() else {
            return add(&base, json!([requirement]));
        };

        match expressions
            .iter()
            .position(|e| e.key == self.labels.capacity_key)
        {
            Some(pos) => PatchOperation::Replace {
                path: format!("{base}/{pos}"),
                value: requirement.clone(),
            },
            None => add(&format!("{base}/-"), requirement.clone()),
        }
    }
}

fn add(path: &str, value: Value) -> PatchOperation {
    PatchOperation::Add {
        path: path.to_string(),
        value,
    }
}

/// Set `key` in a string map at `map_path`, creating the map if needed.
fn map_entry_op(map_path: &str, map_exists: bool, key: &str, value: &str) -> PatchOperation {
    if map_exists {
        add(&format!("{map_path}/{}", escape_pointer(key)), json!(value))
    } else {
        add(map_path, json!({ key: value }))
    }
}

/// Escape a JSON pointer reference token.
pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
