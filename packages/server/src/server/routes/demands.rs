//! Demand submission and cancellation.
//!
//! POST /demands         submit a demand, answer with its first decision
//! DELETE /demands/:id   cancel an active or queued demand

use std::time::Duration;

use arbiter::{CancelOutcome, Demand, DemandHandle, EngineHandle, LifecycleEvent, Ticket};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::server::app::{engine_status, AppState};

/// How long a submission waits for the loop's decision before answering.
const DECISION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub handle: DemandHandle,
    /// First event after `submitted`: admitted, queued or rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<LifecycleEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub handle: DemandHandle,
    pub outcome: CancelOutcome,
}

pub async fn submit_demand(
    Extension(state): Extension<AppState>,
    Json(demand): Json<Demand>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    submit_and_decide(&state.engine, demand).await
}

/// Submit `demand` and wait briefly for the loop's first decision on it.
///
/// Rejections answer 422; everything else is 202 since the demand now lives
/// in the loop.
pub async fn submit_and_decide(
    engine: &EngineHandle,
    demand: Demand,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let mut ticket = engine.submit_tracked(demand).map_err(engine_status)?;
    let handle = ticket.handle();
    let decision = first_decision(&mut ticket).await;
    if decision.is_none() {
        tracing::debug!(%handle, "no decision before timeout");
    }

    let status = match decision {
        Some(LifecycleEvent::Rejected { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::ACCEPTED,
    };
    let notice = decision.as_ref().and_then(LifecycleEvent::notice);

    Ok((
        status,
        Json(SubmitResponse {
            handle,
            decision,
            notice,
        }),
    ))
}

async fn first_decision(ticket: &mut Ticket) -> Option<LifecycleEvent> {
    let wait = async {
        while let Some(envelope) = ticket.next().await {
            if !matches!(envelope.event, LifecycleEvent::Submitted { .. }) {
                return Some(envelope.event);
            }
        }
        None
    };
    tokio::time::timeout(DECISION_TIMEOUT, wait)
        .await
        .ok()
        .flatten()
}

pub async fn cancel_demand(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, StatusCode> {
    let handle = DemandHandle::from_uuid(id);
    let outcome = state.engine.cancel(handle).await.map_err(engine_status)?;

    match outcome {
        CancelOutcome::Ok => Ok(Json(CancelResponse { handle, outcome })),
        CancelOutcome::NotFound => Err(StatusCode::NOT_FOUND),
    }
}
