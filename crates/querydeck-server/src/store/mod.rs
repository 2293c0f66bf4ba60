//! Expression store.
//!
//! Holds the ordered table of dashboard expressions (work items) and
//! receives the values produced by each run.

mod memory;
mod postgres;

pub use memory::MemoryExpressionStore;
pub use postgres::PgExpressionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// One schedulable unit of SQL work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable unique identifier.
    pub id: String,

    /// Name of the source this row runs against.
    pub target_source: String,

    /// Fully formed SQL text.
    pub sql_text: String,

    /// Caption shown on the dashboard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Last successfully observed value.
    #[serde(default)]
    pub last_value: Option<serde_json::Value>,

    /// When `last_value` was recorded.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Create a work item with no recorded value.
    pub fn new(
        id: impl Into<String>,
        target_source: impl Into<String>,
        sql_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target_source: target_source.into(),
            sql_text: sql_text.into(),
            label: None,
            last_value: None,
            last_updated: None,
        }
    }

    /// Set the dashboard caption.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Errors returned by expression stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No work item with this id.
    #[error("Work item not found: {0}")]
    NotFound(String),

    /// The same id appears more than once in a bulk load.
    #[error("Duplicate work item id: {0}")]
    Duplicate(String),

    /// The backing store cannot be used.
    #[error("Expression store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Backing store for the expression table.
///
/// Reads may run concurrently; writes are serialized by the implementation.
#[async_trait]
pub trait ExpressionStore: Send + Sync {
    /// All work items in table order.
    async fn list(&self) -> Result<Vec<WorkItem>, StoreError>;

    /// One work item by id.
    async fn get(&self, id: &str) -> Result<WorkItem, StoreError>;

    /// Record a successful value.
    async fn record_result(
        &self,
        id: &str,
        value: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Replace the whole table.
    async fn replace_all(&self, items: Vec<WorkItem>) -> Result<(), StoreError>;

    /// Edit the SQL of one row, optionally retargeting it.
    async fn update_sql(
        &self,
        id: &str,
        sql_text: &str,
        target_source: Option<&str>,
    ) -> Result<WorkItem, StoreError>;

    /// Check that the store can serve requests.
    async fn health_check(&self) -> bool {
        self.list().await.is_ok()
    }
}

/// Reject bulk loads that repeat an id.
pub(crate) fn ensure_unique(items: &[WorkItem]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(StoreError::Duplicate(item.id.clone()));
        }
    }
    Ok(())
}

/// On-disk expression table.
///
/// ```yaml
/// expressions:
///   - id: orders_today
///     target_source: erp
///     label: Orders today
///     sql_text: SELECT COUNT(*) AS value FROM orders WHERE day = CURRENT_DATE
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionFile {
    #[serde(default)]
    pub expressions: Vec<WorkItem>,
}

impl ExpressionFile {
    /// Parse an expression table from YAML (JSON is accepted as well).
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load an expression table from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExpressionFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ExpressionFileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ExpressionFileError::Invalid {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Errors loading an expressions file.
#[derive(Debug, Error)]
pub enum ExpressionFileError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid expressions file {path}: {source}")]
    Invalid {
        path: String,
        source: serde_yaml::Error,
    },
}
