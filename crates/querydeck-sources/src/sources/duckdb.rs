//! Local file source backed by DuckDB.

use async_trait::async_trait;
use base64::Engine;
use duckdb::{AccessMode, Connection, InterruptHandle};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::config::FileSourceConfig;
use crate::error::SourceError;
use crate::registry::DataSource;
use crate::result::{text_to_json, QueryRows};

/// Upper bound on columns read from one row.
const MAX_COLUMNS: usize = 256;

/// File source opening a DuckDB database per statement.
#[derive(Debug, Clone)]
pub struct DuckdbSource {
    config: FileSourceConfig,
}

impl DuckdbSource {
    /// Create a file source. The file is not opened until a query runs.
    pub fn new(config: FileSourceConfig) -> Self {
        Self { config }
    }

    /// Path of the database file.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    fn open(&self) -> Result<Connection, SourceError> {
        let path = Path::new(&self.config.path);
        if !path.exists() {
            return Err(SourceError::ConnectionFailed(format!(
                "Database file not found: {}",
                self.config.path
            )));
        }

        let result = if self.config.read_only {
            let flags = duckdb::Config::default()
                .access_mode(AccessMode::ReadOnly)
                .map_err(|e| SourceError::Configuration(e.to_string()))?;
            Connection::open_with_flags(path, flags)
        } else {
            Connection::open(path)
        };

        result.map_err(|e| {
            SourceError::ConnectionFailed(format!("Failed to open database: {}", e))
        })
    }

    /// Execute a statement synchronously and return its rows.
    pub fn execute_query(&self, sql: &str) -> Result<QueryRows, SourceError> {
        let conn = self.open()?;
        run_statement(&conn, sql)
    }
}

fn run_statement(conn: &Connection, sql: &str) -> Result<QueryRows, SourceError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SourceError::QueryFailed(format!("Failed to prepare query: {}", e)))?;

    let mapped_rows = stmt
        .query_map([], |row| {
            let mut values = Vec::new();
            while values.len() < MAX_COLUMNS {
                let value: Result<duckdb::types::Value, _> = row.get(values.len());
                match value {
                    Ok(v) => values.push(duckdb_value_to_json(&v)),
                    Err(_) => break,
                }
            }
            Ok(values)
        })
        .map_err(|e| SourceError::QueryFailed(e.to_string()))?;

    let mut rows = Vec::new();
    for row_result in mapped_rows {
        let row = row_result
            .map_err(|e| SourceError::QueryFailed(format!("Failed to fetch row: {}", e)))?;
        rows.push(row);
    }

    let columns: Vec<String> = (0..stmt.column_count())
        .map(|i| {
            stmt.column_name(i)
                .map(|name| name.to_string())
                .unwrap_or_default()
        })
        .collect();

    Ok(QueryRows::new(columns, rows))
}

#[async_trait]
impl DataSource for DuckdbSource {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn query(&self, sql: &str) -> Result<QueryRows, SourceError> {
        tracing::debug!(query = %sql, path = %self.config.path, "Executing file query");

        // DuckDB is synchronous; keep it off the async workers.
        let source = self.clone();
        let sql = sql.to_string();
        let (handle_tx, handle_rx) = oneshot::channel();

        let task = tokio::task::spawn_blocking(move || {
            let conn = source.open()?;
            if handle_tx.send(conn.interrupt_handle()).is_err() {
                return Err(SourceError::QueryFailed(
                    "query abandoned before it started".to_string(),
                ));
            }
            run_statement(&conn, &sql)
        });

        let mut interrupt = InterruptOnDrop(handle_rx.await.ok());
        let result = task
            .await
            .map_err(|e| SourceError::QueryFailed(format!("Task join error: {}", e)))?;
        interrupt.disarm();

        result
    }
}

/// Interrupts the statement running on a blocking worker when the
/// awaiting future is dropped, e.g. by the registry timeout.
struct InterruptOnDrop(Option<Arc<InterruptHandle>>);

impl InterruptOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            tracing::debug!("Interrupting abandoned file query");
            handle.interrupt();
        }
    }
}

/// Convert a DuckDB value to JSON.
fn duckdb_value_to_json(value: &duckdb::types::Value) -> Value {
    use duckdb::types::Value as Dv;
    match value {
        Dv::Null => Value::Null,
        Dv::Boolean(b) => Value::from(*b),
        Dv::TinyInt(n) => Value::from(*n),
        Dv::SmallInt(n) => Value::from(*n),
        Dv::Int(n) => Value::from(*n),
        Dv::BigInt(n) => Value::from(*n),
        Dv::HugeInt(n) => match i64::try_from(*n) {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(n.to_string()),
        },
        Dv::UTinyInt(n) => Value::from(*n),
        Dv::USmallInt(n) => Value::from(*n),
        Dv::UInt(n) => Value::from(*n),
        Dv::UBigInt(n) => Value::from(*n),
        Dv::Float(f) => Value::from(*f as f64),
        Dv::Double(f) => Value::from(*f),
        Dv::Decimal(d) => text_to_json(&d.to_string()),
        Dv::Text(s) => Value::String(s.clone()),
        Dv::Enum(s) => Value::String(s.clone()),
        Dv::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Dv::Timestamp(_, t) => Value::from(*t),
        Dv::Date32(d) => Value::from(*d),
        Dv::Time64(_, t) => Value::from(*t),
        Dv::List(list) => Value::Array(list.iter().map(duckdb_value_to_json).collect()),
        other => Value::String(format!("{:?}", other)),
    }
}
