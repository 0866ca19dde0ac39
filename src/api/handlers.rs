use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::lifecycle::{DecisionCommand, DecisionOutcome};
use crate::models::{AccessRequest, NewAccessRequest, RequestStatus, ResponderIdentity, StatusView};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub data: AccessRequest,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: String,
    /// Operator name recorded as the responder.
    pub responder: Option<String>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub id: String,
    pub status: RequestStatus,
    pub updated: bool,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/requests: persist a request and notify the reviewer
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewAccessRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let request = state.lifecycle.create(payload, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            status: "ok",
            message: "Forwarded and saved.",
            data: request,
        }),
    ))
}

/// GET /api/v1/requests/:id: status projection
pub async fn get_request_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, AppError> {
    let view = state.lifecycle.get_status(&id).await?;
    Ok(Json(view))
}

/// POST /api/v1/requests/:id/decision: operator decision outside the chat
pub async fn decide_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let responder = payload
        .responder
        .filter(|r| !r.trim().is_empty())
        .map(ResponderIdentity::named)
        .unwrap_or_default();

    tracing::info!(request_id = %id, decision = %payload.decision, "operator decision received");

    let outcome = state
        .lifecycle
        .apply_decision(
            DecisionCommand {
                request_id: id.clone(),
                action: payload.decision,
                responder,
                interaction_id: None,
            },
            Utc::now(),
        )
        .await?;

    match outcome {
        DecisionOutcome::Applied(record) => Ok(Json(DecisionResponse {
            id,
            status: record.status,
            updated: true,
        })),
        DecisionOutcome::AlreadySettled(status) => Err(AppError::AlreadySettled { id, status }),
        DecisionOutcome::NotFound => Err(AppError::NotFound(id)),
    }
}

/// GET /metrics: Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.lifecycle.metrics().encode(),
    )
}
