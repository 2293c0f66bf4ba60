//! Run control and status polling.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::engine::{RunStart, RunStateView, StopRequest};
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::state::AppState;

/// Body of `POST /api/run`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    /// Rows to execute in order. Omitted means every row in store order.
    #[serde(default)]
    pub row_ids: Option<Vec<String>>,
}

/// Response to `POST /api/stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
    pub was_running: bool,
}

/// Start a run.
///
/// POST /api/run
///
/// The body is optional. Returns `202 Accepted` when a run was started and
/// `200 OK` with `already_running` when one is in progress.
pub async fn run(State(state): State<AppState>, body: Bytes) -> AppResult<(StatusCode, Json<RunStart>)> {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };

    let outcome = match request.row_ids {
        Some(ids) if ids.is_empty() => {
            return Err(AppError::Validation("row_ids must not be empty".to_string()));
        }
        Some(ids) => state.engine.run(ids),
        None => state.engine.run_all().await.log("starting run over all rows")?,
    };

    let status = match outcome {
        RunStart::Started { .. } => StatusCode::ACCEPTED,
        RunStart::AlreadyRunning => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// Request a stop after the current row.
///
/// POST /api/stop
///
/// Always answers `stopping`; `was_running` tells whether a run was active.
pub async fn stop(State(state): State<AppState>) -> Json<StopResponse> {
    let was_running = state.engine.stop() == StopRequest::Stopping;
    Json(StopResponse {
        status: "stopping".to_string(),
        was_running,
    })
}

/// Current run snapshot.
///
/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<RunStateView> {
    Json(state.status.snapshot().as_ref().clone())
}
