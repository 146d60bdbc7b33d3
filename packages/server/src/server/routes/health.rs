use arbiter::LoopState;
use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    engine: String,
    state: LoopState,
    battery: u8,
    event_subscribers: usize,
}

/// Health check endpoint
///
/// Returns 200 OK while the arbitration loop runs, 503 Service Unavailable
/// once it has stopped.
pub async fn health_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let running = state.engine.is_running();
    let report = state.engine.capabilities();

    let (status_code, status, engine) = if running {
        (StatusCode::OK, "healthy", "running")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "stopped")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            engine: engine.to_string(),
            state: report.state,
            battery: report.battery,
            event_subscribers: state.engine.bus().subscriber_count(),
        }),
    )
}
