//! Application setup and router configuration.

use std::sync::Arc;

use arbiter::{ArbiterError, EngineHandle};
use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method, StatusCode},
    routing::{delete, get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{
    assistant_state_handler, cancel_demand, capabilities_handler, context_handler, events_handler,
    expression_handler, feedback_handler, health_handler, history_handler, message_handler,
    notification_handler, register_tool_handler, stats_handler, status_handler, submit_demand,
    update_context_handler, ExpressionDesk,
};

/// Shared application state
#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: EngineHandle,
    pub expressions: Arc<Mutex<ExpressionDesk>>,
}

/// Map an engine error to the HTTP status handlers return.
pub fn engine_status(error: ArbiterError) -> StatusCode {
    tracing::warn!(error = %error, "engine request failed");
    match error {
        ArbiterError::EngineStopped | ArbiterError::InvariantViolated(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ArbiterError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the Axum application router around a running engine.
pub fn build_app(engine: EngineHandle) -> Router {
    let app_state = AppState {
        engine,
        expressions: Arc::new(Mutex::new(ExpressionDesk::default())),
    };

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        // Demands
        .route("/demands", post(submit_demand))
        .route("/demands/:id", delete(cancel_demand))
        // Ready-made demands
        .route("/expressions", post(expression_handler))
        .route("/expressions/message", post(message_handler))
        .route(
            "/expressions/context",
            get(context_handler).post(update_context_handler),
        )
        .route("/expressions/history", get(history_handler))
        .route("/expressions/stats", get(stats_handler))
        .route("/notifications", post(notification_handler))
        .route("/assistant-state", post(assistant_state_handler))
        // Device side
        .route("/feedback", post(feedback_handler))
        .route("/tools", post(register_tool_handler))
        // Queries
        .route("/capabilities", get(capabilities_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
