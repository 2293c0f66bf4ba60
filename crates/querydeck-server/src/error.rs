//! Error types for the QueryDeck server.
//!
//! `AppError` implements `IntoResponse` so handlers can return it directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use querydeck_sources::SourceError;
use serde_json::json;
use thiserror::Error;

use crate::engine::EngineError;
use crate::store::{ExpressionFileError, StoreError};

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict with the current run or an existing resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expression store cannot be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A data source failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!(error = %msg, "Store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::ExternalService(msg) => {
                tracing::warn!(error = %msg, "External service error");
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Parse(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("work item {id}")),
            StoreError::Duplicate(id) => AppError::Validation(format!("duplicate work item id: {id}")),
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RunInProgress => {
                AppError::Conflict("a run is in progress".to_string())
            }
            EngineError::Store(e) => e.into(),
        }
    }
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::UnknownSource(name) => AppError::NotFound(format!("source {name}")),
            SourceError::Configuration(msg) => AppError::Config(msg),
            other => AppError::ExternalService(other.to_string()),
        }
    }
}

impl From<ExpressionFileError> for AppError {
    fn from(err: ExpressionFileError) -> Self {
        AppError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExpressionFile;

    #[test]
    fn test_not_found_error() {
        let err = AppError::NotFound("work item a".to_string());
        assert_eq!(err.to_string(), "Resource not found: work item a");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: AppError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        let err: AppError = StoreError::Duplicate("a".into()).into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: AppError = EngineError::RunInProgress.into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_source_error_mapping() {
        let err: AppError = SourceError::UnknownSource("erp".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: AppError = SourceError::Timeout(5).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_expression_file_error_is_client_error() {
        let err: AppError = ExpressionFile::load("/nonexistent/expressions.yaml")
            .unwrap_err()
            .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
