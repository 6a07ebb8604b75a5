//! Workload policy parsed from workload metadata.

use std::collections::BTreeMap;

use k8s_openapi::Metadata;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use tiergate_core::{LabelConfig, WorkloadKey};
use tiergate_registry::WorkloadPolicy;

/// A top-level controller object that can carry a capacity policy.
pub trait Workload: Metadata<Ty = ObjectMeta> {
    /// `spec.replicas` as declared, if set.
    fn declared_replicas(&self) -> Option<i32>;
}

impl Workload for Deployment {
    fn declared_replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }
}

impl Workload for StatefulSet {
    fn declared_replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }
}

/// Derive a workload's registry key and policy.
///
/// `fallback_namespace` is used when the object carries no namespace
/// (admission requests for CREATE may omit it). Returns `None` when
/// neither a name nor a namespace can be determined.
pub fn workload_entry<W: Workload>(
    workload: &W,
    fallback_namespace: Option<&str>,
    labels: &LabelConfig,
) -> Option<(WorkloadKey, WorkloadPolicy)> {
    let meta = workload.metadata();
    let name = meta.name.as_deref()?;
    let namespace = meta.namespace.as_deref().or(fallback_namespace)?;
    let key = WorkloadKey::new(namespace, name);
    let policy = parse_policy(&key, meta.labels.as_ref(), workload.declared_replicas(), labels);
    Some((key, policy))
}

/// Build a policy from workload labels.
///
/// Replicas default to 1 (the API server default). The cap defaults to
/// the replica count when its label is absent or not a non-negative
/// integer.
pub fn parse_policy(
    key: &WorkloadKey,
    workload_labels: Option<&BTreeMap<String, String>>,
    replicas: Option<i32>,
    labels: &LabelConfig,
) -> WorkloadPolicy {
    let replicas = replicas.unwrap_or(1).max(0) as u32;

    let enabled = workload_labels
        .and_then(|l| l.get(&labels.enable_key))
        .is_some_and(|v| v == "true");

    let max_guaranteed = match workload_labels.and_then(|l| l.get(&labels.max_guaranteed_key)) {
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(cap) => cap,
            Err(e) => {
                debug!(%key, value = %raw, error = %e, "unparsable max-guaranteed label, using replicas");
                replicas
            }
        },
        None => replicas,
    };

    WorkloadPolicy::new(max_guaranteed, Some(replicas), enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;

    fn deployment(labels: &[(&str, &str)], replicas: Option<i32>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("caddy".to_string()),
                namespace: Some("web".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn reads_enable_and_cap_labels() {
        let labels = LabelConfig::default();
        let d = deployment(
            &[("tiergate.io/enabled", "true"), ("tiergate.io/max-guaranteed", "2")],
            Some(5),
        );

        let (key, policy) = workload_entry(&d, None, &labels).unwrap();
        assert_eq!(key, WorkloadKey::new("web", "caddy"));
        assert_eq!(policy, WorkloadPolicy::new(2, Some(5), true));
    }

    #[test]
    fn unparsable_cap_falls_back_to_replicas() {
        let labels = LabelConfig::default();
        let d = deployment(
            &[("tiergate.io/enabled", "true"), ("tiergate.io/max-guaranteed", "two")],
            Some(4),
        );

        let (_, policy) = workload_entry(&d, None, &labels).unwrap();
        assert_eq!(policy.max_guaranteed, 4);
    }

    #[test]
    fn negative_cap_falls_back_to_replicas() {
        let labels = LabelConfig::default();
        let d = deployment(&[("tiergate.io/max-guaranteed", "-1")], Some(3));

        let (_, policy) = workload_entry(&d, None, &labels).unwrap();
        assert_eq!(policy.max_guaranteed, 3);
    }

    #[test]
    fn missing_labels_mean_disabled_with_replica_cap() {
        let labels = LabelConfig::default();
        let d = deployment(&[], None);

        let (_, policy) = workload_entry(&d, None, &labels).unwrap();
        assert!(!policy.enabled);
        assert_eq!(policy.max_guaranteed, 1);
        assert_eq!(policy.declared_replicas, 1);
    }

    #[test]
    fn enable_label_must_be_exactly_true() {
        let labels = LabelConfig::default();
        let d = deployment(&[("tiergate.io/enabled", "yes")], Some(1));
        assert!(!workload_entry(&d, None, &labels).unwrap().1.enabled);
    }

    #[test]
    fn fallback_namespace_used_when_object_has_none() {
        let labels = LabelConfig::default();
        let mut d = deployment(&[], Some(1));
        d.metadata.namespace = None;

        let (key, _) = workload_entry(&d, Some("from-request"), &labels).unwrap();
        assert_eq!(key.namespace, "from-request");
        assert!(workload_entry(&d, None, &labels).is_none());
    }

    #[test]
    fn stateful_sets_are_workloads() {
        let labels = LabelConfig::default();
        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                namespace: Some("data".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (key, policy) = workload_entry(&sts, None, &labels).unwrap();
        assert_eq!(key, WorkloadKey::new("data", "db"));
        assert_eq!(policy.declared_replicas, 1);
    }
}
