//! Accept endpoint and diagnostics

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use super::AppState;
use crate::engine::{ExecuteRequest, RunSnapshot};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub run_id: String,
}

/// `POST /api/execute`. Language errors surface later as a run `ERROR`.
pub async fn accept(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Json<AcceptResponse> {
    let run_id = state.service.start(request);
    Json(AcceptResponse { run_id })
}

pub async fn languages(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "languages": state.service.supported_languages() }))
}

pub async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSnapshot>, StatusCode> {
    state
        .service
        .snapshot(&run_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeRuns": state.service.active_runs(),
        "availableSlots": state.service.available_slots(),
    }))
}
