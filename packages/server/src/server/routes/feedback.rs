//! Device-side input: feedback from the transport and runtime tools.

use arbiter::{Feedback, ToolRegistration};
use axum::{extract::Extension, http::StatusCode, Json};

use crate::server::app::{engine_status, AppState};

/// Battery, connection, capability and sensor updates from the device link.
pub async fn feedback_handler(
    Extension(state): Extension<AppState>,
    Json(feedback): Json<Feedback>,
) -> Result<StatusCode, StatusCode> {
    tracing::debug!(?feedback, "feedback received");
    state.engine.feedback(feedback).map_err(engine_status)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn register_tool_handler(
    Extension(state): Extension<AppState>,
    Json(tool): Json<ToolRegistration>,
) -> Result<StatusCode, StatusCode> {
    if tool.channels.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    state
        .engine
        .register_tool(tool.name, tool.channels)
        .map_err(engine_status)?;
    Ok(StatusCode::ACCEPTED)
}
