//! HTTP review API.
//!
//! A decision gateway over HTTP: reviewers list paused checkpoints and post
//! decisions. It shares the checkpoint database with any orchestrator
//! process, which picks the decision up on its next poll.

pub mod server;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use invoice_flow_common::{Decision, StoreError};

use crate::audit::AuditLog;
use crate::gateway::DecisionGateway;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub gateway: DecisionGateway,
    pub audit: AuditLog,
}

pub type SharedState = Arc<AppState>;

/// Reviewer id recorded when a request does not name one.
pub const DEFAULT_REVIEWER: &str = "api_user";

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub checkpoint_id: String,
    pub decision: Option<String>,
    pub reviewer_id: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::InvalidTransition { .. } | StoreError::DuplicateCheckpoint { .. } => {
                ApiError::Conflict(err.to_string())
            }
            StoreError::Corrupt { .. } | StoreError::Database(_) | StoreError::LockPoisoned => {
                error!(error = %err, "store failure in review API");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// Malformed bodies get the same `{"error": ...}` shape as every other
/// failure.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/human-review/pending", get(list_pending))
        .route("/human-review/decision", post(submit_decision))
        .route("/checkpoints/{id}", get(get_checkpoint))
        .route("/audit/{document_id}", get(get_audit))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_pending(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let items = state.gateway.pending().await?;
    Ok(Json(json!({ "items": items })))
}

async fn submit_decision(
    State(state): State<SharedState>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let decision: Decision = req
        .decision
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Missing decision (ACCEPT or REJECT)".into()))?
        .parse()
        .map_err(ApiError::BadRequest)?;
    let reviewer = req
        .reviewer_id
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REVIEWER);

    let receipt = state
        .gateway
        .submit(&req.checkpoint_id, decision, reviewer)
        .await
        .inspect_err(|e| {
            warn!(checkpoint_id = %req.checkpoint_id, error = %e, "decision refused")
        })?;
    Ok(Json(receipt))
}

async fn get_checkpoint(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checkpoint = state.gateway.checkpoint(&id).await?;
    Ok(Json(checkpoint))
}

async fn get_audit(
    State(state): State<SharedState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.audit.read_all(&document_id).await?;
    Ok(Json(records))
}
