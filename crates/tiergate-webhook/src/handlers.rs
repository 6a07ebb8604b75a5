//! Admission and diagnostic handlers.
//!
//! The mutate handler decodes the envelope itself so a malformed body is
//! answered with a 400 instead of axum's extractor rejection.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use tiergate_core::WorkloadKey;
use tiergate_placement::{PatchGenerator, Workload, workload_entry};
use tiergate_registry::{Decision, WorkloadState};

use crate::WebhookState;
use crate::error::AdmissionError;
use crate::review::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};

/// Response wrapper for diagnostic endpoints.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
        })
    }
}

#[derive(Serialize)]
struct WorkloadEntry {
    key: String,
    #[serde(flatten)]
    state: WorkloadState,
}

// ── Admission ──────────────────────────────────────────────────

/// POST /mutate
pub async fn mutate(State(state): State<WebhookState>, body: Bytes) -> Response {
    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!(error = %e, "rejecting malformed admission review");
            return AdmissionError::MalformedReview(e).into_response();
        }
    };
    let Some(request) = review.request else {
        warn!("rejecting admission review without request");
        return AdmissionError::MissingRequest.into_response();
    };

    let response = admit(&state, &request);
    Json(AdmissionReview::respond(response)).into_response()
}

/// Route a request by the kind of object under admission.
pub fn admit(state: &WebhookState, request: &AdmissionRequest) -> AdmissionResponse {
    match request.kind.kind.as_str() {
        "Pod" => admit_pod(state, request),
        "Deployment" => admit_workload::<Deployment>(state, request),
        "StatefulSet" => admit_workload::<StatefulSet>(state, request),
        other => {
            debug!(kind = %other, uid = %request.uid, "kind not handled, allowing");
            AdmissionResponse::allow(&request.uid)
        }
    }
}

fn admit_pod(state: &WebhookState, request: &AdmissionRequest) -> AdmissionResponse {
    if request.operation != Operation::Create {
        return AdmissionResponse::allow(&request.uid);
    }

    let pod: Pod = match decode_object(request, request.object.as_ref()) {
        Ok(pod) => pod,
        Err(e) => return fail_open(request, e),
    };
    let namespace = request
        .namespace
        .as_deref()
        .or(pod.metadata.namespace.as_deref())
        .unwrap_or("default");

    let decision = if request.is_dry_run() {
        state.engine.preview(namespace, &pod)
    } else {
        state.engine.decide(namespace, &pod)
    };
    let tier = decision.tier();

    let ops = state.patches.placement_patch(&pod, tier);
    let patch = match PatchGenerator::encode(&ops) {
        Ok(patch) => patch,
        Err(e) => return fail_open(request, AdmissionError::PatchEncode(e)),
    };

    info!(
        uid = %request.uid,
        %namespace,
        pod = pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()).unwrap_or(""),
        %tier,
        decision = decision_label(decision),
        dry_run = request.is_dry_run(),
        "pod admitted"
    );
    AdmissionResponse::allow(&request.uid).with_patch(&patch)
}

fn admit_workload<W>(state: &WebhookState, request: &AdmissionRequest) -> AdmissionResponse
where
    W: Workload + DeserializeOwned,
{
    let allow = AdmissionResponse::allow(&request.uid);
    if request.is_dry_run() {
        debug!(uid = %request.uid, kind = %request.kind.kind, "dry-run workload admission, registry untouched");
        return allow;
    }

    let registry = state.engine.registry();
    match request.operation {
        Operation::Create | Operation::Update => {
            let workload: W = match decode_object(request, request.object.as_ref()) {
                Ok(workload) => workload,
                Err(e) => return fail_open(request, e),
            };
            let Some((key, policy)) = workload_entry(&workload, request.namespace.as_deref(), &state.labels) else {
                return allow;
            };
            if request.operation == Operation::Create {
                registry.register(&key, policy);
            } else {
                registry.update_policy(&key, policy);
            }
        }
        Operation::Delete => {
            if let Some(key) = deleted_key::<W>(state, request) {
                registry.deregister(&key);
            }
        }
        Operation::Connect => {}
    }
    allow
}

/// Identify a deleted workload from the old object, or from the request
/// coordinates when the old object is absent.
fn deleted_key<W>(state: &WebhookState, request: &AdmissionRequest) -> Option<WorkloadKey>
where
    W: Workload + DeserializeOwned,
{
    let from_old = request
        .old_object
        .as_ref()
        .and_then(|old| serde_json::from_value::<W>(old.clone()).ok())
        .and_then(|w| workload_entry(&w, request.namespace.as_deref(), &state.labels))
        .map(|(key, _)| key);

    from_old.or_else(|| {
        Some(WorkloadKey::new(
            request.namespace.as_deref()?,
            request.name.as_deref()?,
        ))
    })
}

fn decode_object<T: DeserializeOwned>(
    request: &AdmissionRequest,
    object: Option<&serde_json::Value>,
) -> Result<T, AdmissionError> {
    let kind = request.kind.kind.clone();
    let object = object.ok_or_else(|| AdmissionError::MissingObject { kind: kind.clone() })?;
    serde_json::from_value(object.clone()).map_err(|source| AdmissionError::ObjectDecode { kind, source })
}

fn fail_open(request: &AdmissionRequest, error: AdmissionError) -> AdmissionResponse {
    warn!(uid = %request.uid, kind = %request.kind.kind, error = %error, "admission failed open");
    AdmissionResponse::allow(&request.uid).with_warning(format!("tiergate: {error}"))
}

fn decision_label(decision: Decision) -> &'static str {
    match decision {
        Decision::Reserved(_) => "reserved",
        Decision::Exempt => "exempt",
        Decision::Unmanaged => "unmanaged",
    }
}

// ── Diagnostics ────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /api/v1/workloads
pub async fn list_workloads(State(state): State<WebhookState>) -> impl IntoResponse {
    let entries: Vec<WorkloadEntry> = state
        .engine
        .registry()
        .workloads()
        .into_iter()
        .map(|(key, state)| WorkloadEntry {
            key: key.to_string(),
            state,
        })
        .collect();
    ApiResponse::ok(entries)
}
