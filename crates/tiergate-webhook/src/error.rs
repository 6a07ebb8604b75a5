use std::path::PathBuf;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while handling an admission request.
///
/// Only envelope errors reach the client as HTTP errors. Everything past
/// the envelope fails open and is reported as an admission warning.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("request body is not an AdmissionReview: {0}")]
    MalformedReview(#[source] serde_json::Error),

    #[error("AdmissionReview has no request")]
    MissingRequest,

    #[error("failed to decode {kind} object: {source}")]
    ObjectDecode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} admission carries no object")]
    MissingObject { kind: String },

    #[error("failed to encode patch: {0}")]
    PatchEncode(#[source] serde_json::Error),
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::MalformedReview(_) | AdmissionError::MissingRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Errors raised while setting up or running the TLS listener.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to read {path}: {source}")]
    ReadPem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}
