//! Health & readiness handlers.
//!
//! - GET /health  -> simple liveness (`{"status":"healthy"}`)
//! - GET /readyz  -> readiness that checks the backend hands out a credential

use crate::services::library_service::LibraryService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /health`
///
/// Liveness probe. Never performs I/O.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Returns 200 when a backend credential is cached or can be obtained,
/// 503 otherwise.
pub async fn readyz(State(service): State<LibraryService>) -> impl IntoResponse {
    let backend = service.backend_kind().to_string();
    match service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ok".into(),
                backend,
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "error".into(),
                backend,
                error: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
