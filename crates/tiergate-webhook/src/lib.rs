//! tiergate-webhook — the mutating admission gateway.
//!
//! Decodes `AdmissionReview` envelopes, routes pod admissions to the
//! decision engine and workload admissions to the registry, and answers
//! with a base64 JSON patch.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/mutate` | Mutating admission endpoint |
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/api/v1/workloads` | Registry contents, sorted by key |
//!
//! The router is transport-agnostic; [`tls::serve`] runs it over rustls.

pub mod error;
pub mod handlers;
pub mod review;
pub mod tls;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use tiergate_core::LabelConfig;
use tiergate_placement::{DecisionEngine, PatchGenerator};

pub use error::{AdmissionError, ServeError};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub engine: DecisionEngine,
    pub patches: PatchGenerator,
    pub labels: LabelConfig,
    pub request_timeout: Duration,
}

/// Build the webhook router.
pub fn build_router(state: WebhookState) -> Router {
    let timeout = TimeoutLayer::new(state.request_timeout);

    let api_routes = Router::new()
        .route("/workloads", get(handlers::list_workloads))
        .with_state(state.clone());

    Router::new()
        .route("/mutate", post(handlers::mutate).layer(timeout))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
