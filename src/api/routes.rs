//! Control API route handlers.
//!
//! All endpoints return JSON. Engine errors map onto HTTP status codes in
//! [`ApiError`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::engine::{BotScheduler, BotStatusReport, StartOutcome};
use crate::types::{EngineError, Position};

pub type AppState = Arc<BotScheduler>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ConfigurationInvalid(_) | EngineError::InvalidDecision(_) => StatusCode::BAD_REQUEST,
            EngineError::PersistenceConflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "API request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub account_id: String,
    pub outcome: StartOutcome,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub account_id: String,
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/bots
pub async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<BotStatusReport>>, ApiError> {
    Ok(Json(state.status_all().await?))
}

/// POST /api/bots/:id/start
pub async fn start_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StartResponse>, ApiError> {
    let outcome = state.start(&id).await?;
    Ok(Json(StartResponse { account_id: id, outcome }))
}

/// POST /api/bots/:id/stop
pub async fn stop_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let stopped = state.stop(&id).await?;
    Ok(Json(StopResponse { account_id: id, stopped }))
}

/// GET /api/bots/:id/status
pub async fn bot_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BotStatusReport>, ApiError> {
    Ok(Json(state.status(&id).await?))
}

/// GET /api/bots/:id/positions
pub async fn open_positions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Position>>, ApiError> {
    let store = state.store();
    if store.load_account(&id).await.map_err(EngineError::from)?.is_none() {
        return Err(EngineError::NotFound(format!("account {id}")).into());
    }
    Ok(Json(store.open_positions(&id).await.map_err(EngineError::from)?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
