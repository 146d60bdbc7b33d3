use arbiter::{CapabilityReport, Snapshot};
use axum::{extract::Extension, http::StatusCode, Json};

use crate::server::app::{engine_status, AppState};

/// Latest published capability report. Never waits on the loop.
pub async fn capabilities_handler(Extension(state): Extension<AppState>) -> Json<CapabilityReport> {
    Json(state.engine.capabilities())
}

/// Full view of active demands, the wait queue and registered streams.
pub async fn status_handler(Extension(state): Extension<AppState>) -> Result<Json<Snapshot>, StatusCode> {
    let snapshot = state.engine.snapshot().await.map_err(engine_status)?;
    Ok(Json(snapshot))
}
