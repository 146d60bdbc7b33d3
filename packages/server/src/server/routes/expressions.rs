//! Ready-made demands for the assistant's expressive output.
//!
//! POST /expressions            emotion expression
//! POST /expressions/message    expression sized to a message
//! GET  /expressions/context    current expression context
//! POST /expressions/context    update part of the context
//! GET  /expressions/history    recent expressions
//! GET  /expressions/stats      emotion and pattern distribution
//! POST /notifications          status flash
//! POST /assistant-state        expression for what the assistant is doing

use std::time::Duration;

use arbiter::{
    AssistantState, Demand, Emotion, ExpressionContext, ExpressionLog, ExpressionRecord,
    ExpressionStats, MessageKind, Notification, SystemLoad, TimeOfDay, UserActivity,
};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::server::app::AppState;
use crate::server::routes::demands::{submit_and_decide, SubmitResponse};

/// Context and history shared by the expression routes.
#[derive(Debug, Default)]
pub struct ExpressionDesk {
    pub context: ExpressionContext,
    pub history: ExpressionLog,
}

fn default_intensity() -> f32 {
    0.5
}

fn default_urgency() -> u8 {
    5
}

#[derive(Debug, Deserialize)]
pub struct ExpressionRequest {
    pub emotion: Emotion,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    /// Omit for a continuous expression.
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message_type: MessageKind,
    #[serde(default)]
    pub content: String,
    /// 1 to 10.
    #[serde(default = "default_urgency")]
    pub urgency: u8,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContextUpdate {
    pub time_of_day: Option<TimeOfDay>,
    pub user_activity: Option<UserActivity>,
    pub system_load: Option<SystemLoad>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    pub level: Notification,
}

#[derive(Debug, Deserialize)]
pub struct AssistantStateRequest {
    pub state: AssistantState,
}

/// Records returned when the history query names no limit.
const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Submit an expression and keep it in the history unless it was refused.
async fn submit_expression(
    state: &AppState,
    emotion: Emotion,
    demand: Demand,
    context: ExpressionContext,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let recorded = demand.clone();
    let (status, response) = submit_and_decide(&state.engine, demand).await?;
    if status == StatusCode::ACCEPTED {
        state
            .expressions
            .lock()
            .await
            .history
            .record(response.handle, emotion, &recorded, context);
    }
    Ok((status, response))
}

pub async fn expression_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<ExpressionRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let context = state.expressions.lock().await.context;
    let duration = request.duration_ms.map(Duration::from_millis);
    let demand = request.emotion.demand_in(request.intensity, duration, &context);
    submit_expression(&state, request.emotion, demand, context).await
}

pub async fn message_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let context = state.expressions.lock().await.context;
    let (emotion, _) = request.message_type.expression();
    let demand = request
        .message_type
        .demand(&request.content, request.urgency, &context);
    tracing::debug!(
        message_type = ?request.message_type,
        urgency = request.urgency,
        length = request.content.len(),
        "message expression"
    );
    submit_expression(&state, emotion, demand, context).await
}

pub async fn context_handler(Extension(state): Extension<AppState>) -> Json<ExpressionContext> {
    Json(state.expressions.lock().await.context)
}

pub async fn update_context_handler(
    Extension(state): Extension<AppState>,
    Json(update): Json<ContextUpdate>,
) -> Json<ExpressionContext> {
    let mut desk = state.expressions.lock().await;
    if let Some(time_of_day) = update.time_of_day {
        desk.context.time_of_day = time_of_day;
    }
    if let Some(user_activity) = update.user_activity {
        desk.context.user_activity = user_activity;
    }
    if let Some(system_load) = update.system_load {
        desk.context.system_load = system_load;
    }
    tracing::debug!(context = ?desk.context, "expression context updated");
    Json(desk.context)
}

pub async fn history_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ExpressionRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.expressions.lock().await.history.recent(limit))
}

pub async fn stats_handler(Extension(state): Extension<AppState>) -> Json<ExpressionStats> {
    Json(state.expressions.lock().await.history.stats())
}

pub async fn notification_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    submit_and_decide(&state.engine, request.level.demand()).await
}

pub async fn assistant_state_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<AssistantStateRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let context = state.expressions.lock().await.context;
    let (emotion, _) = request.state.emotion();
    let demand = request.state.demand_in(&context);
    submit_expression(&state, emotion, demand, context).await
}
