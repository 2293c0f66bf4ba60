//! Expression table API handlers.
//!
//! Listing and single-row reads for the dashboard, plus the admin edit and
//! bulk reload operations.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::state::AppState;
use crate::store::{ExpressionFile, WorkItem};

/// Body of `PUT /api/expressions/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateExpressionRequest {
    pub sql_text: String,
    #[serde(default)]
    pub target_source: Option<String>,
}

/// Response to a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub count: usize,
    /// Where the items came from: "request" or the file path.
    pub origin: String,
}

/// List all expressions in table order.
///
/// GET /api/expressions
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<WorkItem>>> {
    let items = state.store().list().await.log("listing expressions")?;
    Ok(Json(items))
}

/// Get one expression.
///
/// GET /api/expressions/{id}
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<WorkItem>> {
    Ok(Json(state.store().get(&id).await?))
}

/// Edit the SQL of one expression.
///
/// PUT /api/expressions/{id}
///
/// Allowed during a run; the engine reads each row when it reaches it.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateExpressionRequest>,
) -> AppResult<Json<WorkItem>> {
    if request.sql_text.trim().is_empty() {
        return Err(AppError::Validation("sql_text must not be empty".to_string()));
    }
    if let Some(source) = &request.target_source {
        if !state.sources().has(source) {
            return Err(AppError::Validation(format!("unknown source: {source}")));
        }
    }

    let item = state
        .store()
        .update_sql(&id, &request.sql_text, request.target_source.as_deref())
        .await?;

    tracing::info!(row_id = %id, source = %item.target_source, "Expression updated");
    Ok(Json(item))
}

/// Replace the expression table.
///
/// POST /api/expressions/reload
///
/// The body is an expression file (`{"expressions": [...]}`). Without a
/// body the configured expressions file is read again. Rejected with
/// `409 Conflict` while a run is active.
pub async fn reload(State(state): State<AppState>, body: Bytes) -> AppResult<Json<ReloadResponse>> {
    let (file, origin) = if body.iter().all(u8::is_ascii_whitespace) {
        let path = state.config.expressions_file.as_deref().ok_or_else(|| {
            AppError::BadRequest("no expressions in request and no expressions file configured".to_string())
        })?;
        (ExpressionFile::load(path)?, path.to_string())
    } else {
        let file: ExpressionFile =
            serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
        (file, "request".to_string())
    };

    let count = state.engine.reload(file.expressions).await?;
    tracing::info!(count, origin = %origin, "Expression table reloaded");

    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
        count,
        origin,
    }))
}
