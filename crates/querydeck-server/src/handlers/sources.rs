//! Data source admin handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use querydeck_sources::SourceInfo;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::AppState;

/// Response to a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCheckResponse {
    pub name: String,
    pub status: String,
    pub latency_ms: u64,
}

/// List registered sources.
///
/// GET /api/sources
pub async fn list(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    Json(state.sources().describe())
}

/// Check that a source answers, under its timeout and retry policy.
///
/// POST /api/sources/{name}/check
pub async fn check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<SourceCheckResponse>> {
    let elapsed = state.sources().check(&name).await?;
    tracing::info!(source = %name, latency_ms = elapsed.as_millis() as u64, "Source reachable");

    Ok(Json(SourceCheckResponse {
        name,
        status: "ok".to_string(),
        latency_ms: elapsed.as_millis() as u64,
    }))
}
