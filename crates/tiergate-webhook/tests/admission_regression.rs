//! Admission gateway regression tests.
//!
//! Drives the router end to end: workload admissions register policies,
//! pod admissions come back with decodable placement patches, and bad
//! input fails the way the API server expects.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use tiergate_core::{LabelConfig, PatchConfig, WorkloadKey};
use tiergate_placement::{DecisionEngine, OwnerIndex, OwnerLink, PatchGenerator};
use tiergate_registry::WorkloadRegistry;
use tiergate_webhook::{AdmissionReview, WebhookState, build_router};

fn test_state() -> WebhookState {
    let registry = Arc::new(WorkloadRegistry::new(Duration::from_secs(300)));
    let owners = Arc::new(OwnerIndex::new());
    owners.record("ReplicaSet", "web", "caddy-6477dfc6c6", Some(OwnerLink::new("Deployment", "caddy")));
    WebhookState {
        engine: DecisionEngine::new(registry, owners),
        patches: PatchGenerator::new(LabelConfig::default(), PatchConfig::default()),
        labels: LabelConfig::default(),
        request_timeout: Duration::from_secs(5),
    }
}

fn review(kind: &str, operation: &str, object: Value, dry_run: bool) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": format!("uid-{kind}-{operation}"),
            "kind": { "group": if kind == "Pod" { "" } else { "apps" }, "version": "v1", "kind": kind },
            "namespace": "web",
            "operation": operation,
            "object": object,
            "dryRun": dry_run
        }
    })
}

fn caddy_deployment(cap: &str, replicas: i32) -> Value {
    json!({
        "metadata": {
            "name": "caddy",
            "namespace": "web",
            "labels": { "tiergate.io/enabled": "true", "tiergate.io/max-guaranteed": cap }
        },
        "spec": { "replicas": replicas, "selector": {}, "template": {} }
    })
}

fn caddy_pod() -> Value {
    json!({
        "metadata": {
            "generateName": "caddy-6477dfc6c6-",
            "namespace": "web",
            "labels": { "app": "caddy", "pod-template-hash": "6477dfc6c6" },
            "ownerReferences": [{
                "apiVersion": "apps/v1",
                "kind": "ReplicaSet",
                "name": "caddy-6477dfc6c6",
                "uid": "rs-uid",
                "controller": true
            }]
        },
        "spec": { "containers": [{ "name": "caddy", "image": "caddy:2" }] }
    })
}

async fn post_review(router: &axum::Router, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/mutate")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// The capacity value the patch pins the pod to.
fn patched_tier(response: &Value) -> String {
    let review: AdmissionReview = serde_json::from_value(response.clone()).unwrap();
    let response = review.response.unwrap();
    assert_eq!(response.patch_type.as_deref(), Some("JSONPatch"));
    let ops: Vec<Value> = serde_json::from_slice(&response.decoded_patch().unwrap()).unwrap();

    ops.iter()
        .find(|op| op["path"] == "/metadata/labels/node.kubernetes.io~1capacity")
        .and_then(|op| op["value"].as_str())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn workload_then_pods_respect_the_cap() {
    let state = test_state();
    let registry = state.engine.registry().clone();
    let router = build_router(state);

    let (status, body) = post_review(&router, review("Deployment", "CREATE", caddy_deployment("2", 5), false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());

    let mut tiers = Vec::new();
    for _ in 0..5 {
        let (status, body) = post_review(&router, review("Pod", "CREATE", caddy_pod(), false)).await;
        assert_eq!(status, StatusCode::OK);
        tiers.push(patched_tier(&body));
    }
    assert_eq!(tiers, ["guaranteed", "guaranteed", "preemptible", "preemptible", "preemptible"]);

    let state = registry.snapshot(&WorkloadKey::new("web", "caddy")).unwrap();
    assert_eq!((state.guaranteed_count, state.preemptible_count), (2, 3));
}

#[tokio::test]
async fn pod_patch_carries_affinity_and_deletion_cost() {
    let router = build_router(test_state());
    post_review(&router, review("Deployment", "CREATE", caddy_deployment("1", 1), false)).await;

    let (_, body) = post_review(&router, review("Pod", "CREATE", caddy_pod(), false)).await;
    let review: AdmissionReview = serde_json::from_value(body).unwrap();
    let ops: Value = serde_json::from_slice(&review.response.unwrap().decoded_patch().unwrap()).unwrap();

    assert_eq!(
        ops[0],
        json!({
            "op": "add",
            "path": "/spec/affinity",
            "value": { "nodeAffinity": { "requiredDuringSchedulingIgnoredDuringExecution": {
                "nodeSelectorTerms": [{ "matchExpressions": [
                    { "key": "node.kubernetes.io/capacity", "operator": "In", "values": ["guaranteed"] }
                ] }]
            } } }
        })
    );
    assert!(ops.as_array().unwrap().iter().any(|op| {
        op["path"] == "/metadata/annotations" && op["value"]["controller.kubernetes.io/pod-deletion-cost"] == "100"
    }));
}

#[tokio::test]
async fn unmanaged_pod_goes_preemptible() {
    let state = test_state();
    let registry = state.engine.registry().clone();
    let router = build_router(state);

    let (status, body) = post_review(&router, review("Pod", "CREATE", caddy_pod(), false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched_tier(&body), "preemptible");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn dry_run_does_not_reserve() {
    let state = test_state();
    let registry = state.engine.registry().clone();
    let router = build_router(state);
    post_review(&router, review("Deployment", "CREATE", caddy_deployment("1", 2), false)).await;

    let (_, body) = post_review(&router, review("Pod", "CREATE", caddy_pod(), true)).await;
    assert_eq!(patched_tier(&body), "guaranteed");
    let (_, body) = post_review(&router, review("Pod", "CREATE", caddy_pod(), false)).await;
    assert_eq!(patched_tier(&body), "guaranteed");

    let state = registry.snapshot(&WorkloadKey::new("web", "caddy")).unwrap();
    assert_eq!(state.guaranteed_count, 1);
}

#[tokio::test]
async fn workload_update_keeps_counts_and_delete_deregisters() {
    let state = test_state();
    let registry = state.engine.registry().clone();
    let router = build_router(state);
    let key = WorkloadKey::new("web", "caddy");

    post_review(&router, review("Deployment", "CREATE", caddy_deployment("1", 3), false)).await;
    post_review(&router, review("Pod", "CREATE", caddy_pod(), false)).await;
    post_review(&router, review("Deployment", "UPDATE", caddy_deployment("3", 3), false)).await;

    let state = registry.snapshot(&key).unwrap();
    assert_eq!(state.max_guaranteed, 3);
    assert_eq!(state.guaranteed_count, 1);

    let mut delete = review("Deployment", "DELETE", Value::Null, false);
    delete["request"]["name"] = json!("caddy");
    delete["request"]["oldObject"] = caddy_deployment("3", 3);
    let (status, _) = post_review(&router, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert!(registry.snapshot(&key).is_none());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let router = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/mutate")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn review_without_request_is_rejected() {
    let router = build_router(test_state());
    let (status, body) = post_review(&router, json!({ "apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn undecodable_pod_fails_open() {
    let router = build_router(test_state());
    let (status, body) = post_review(&router, review("Pod", "CREATE", json!({ "spec": "not-a-spec" }), false)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
    assert!(body["response"]["warnings"][0].as_str().unwrap().contains("Pod"));
}

#[tokio::test]
async fn non_create_pod_operations_pass_through() {
    let router = build_router(test_state());
    let (_, body) = post_review(&router, review("Pod", "UPDATE", caddy_pod(), false)).await;
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
}

#[tokio::test]
async fn diagnostics_list_registered_workloads() {
    let router = build_router(test_state());
    post_review(&router, review("Deployment", "CREATE", caddy_deployment("2", 4), false)).await;

    let req = Request::builder().uri("/api/v1/workloads").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"][0]["key"], "web/caddy");
    assert_eq!(body["data"][0]["max_guaranteed"], 2);

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
