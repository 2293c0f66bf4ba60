//! Query result types and scalar extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;

/// Column name preferred when extracting a scalar from a row.
pub const VALUE_COLUMN: &str = "value";

/// Rows returned by a source, with column order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    /// Column names in result order.
    pub columns: Vec<String>,

    /// Row values, each aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Create a result from columns and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Create an empty result with the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first row, if any.
    pub fn first_row(&self) -> Option<&[Value]> {
        self.rows.first().map(|r| r.as_slice())
    }

    /// Index of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Extract the single scalar a dashboard expression produces.
///
/// Takes the first row. Within it, a column named exactly `value` wins,
/// otherwise the first column is used. An empty result set is an error,
/// never a zero.
pub fn extract_scalar(rows: &QueryRows) -> Result<Value, SourceError> {
    let first = rows
        .first_row()
        .ok_or_else(|| SourceError::QueryFailed("no rows returned".to_string()))?;

    let idx = rows.column_index(VALUE_COLUMN).unwrap_or(0);

    first
        .get(idx)
        .cloned()
        .ok_or_else(|| SourceError::QueryFailed("no columns returned".to_string()))
}

/// Convert a textual cell into the most specific JSON value.
///
/// Integers become JSON integers, other finite numbers become floats and
/// everything else stays a string.
pub fn text_to_json(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(text.to_string())
}
