//! Axum Handlers for the REST API
//!
//! The interview itself runs over `/ws`; these endpoints let clients check
//! the service and fetch the shared capture parameters.

use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::{
    models::{HealthResponse, VadConfigResponse},
    state::AppState,
};

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The service is up", body = HealthResponse)
    ),
    tag = "Interview API"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// The voice-activity-detection parameters clients should capture with.
#[utoipa::path(
    get,
    path = "/vad-config",
    responses(
        (status = 200, description = "Canonical VAD configuration", body = VadConfigResponse)
    ),
    tag = "Interview API"
)]
pub async fn vad_config(State(state): State<Arc<AppState>>) -> Json<VadConfigResponse> {
    Json(VadConfigResponse::from(&state.vad_config))
}
