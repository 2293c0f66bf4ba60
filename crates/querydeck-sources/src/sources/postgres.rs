//! Server-style relational source backed by PostgreSQL.

use async_trait::async_trait;
use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime};
use serde_json::Value;
use tokio_postgres::{CancelToken, NoTls, SimpleQueryMessage};

use crate::config::ServerSourceConfig;
use crate::error::SourceError;
use crate::registry::DataSource;
use crate::result::{text_to_json, QueryRows};

/// Server source executing fully formed SQL text.
///
/// Statements go through the simple-query protocol: no parameter binding,
/// every cell arrives as text and is converted with [`text_to_json`].
pub struct PostgresSource {
    pool: Pool,
    schema: Option<String>,
}

impl PostgresSource {
    /// Create a source from connection parameters.
    ///
    /// The pool is created lazily; no connection is opened here.
    pub fn new(config: ServerSourceConfig) -> Result<Self, SourceError> {
        let pool = pool_config(&config)?
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SourceError::Configuration(format!("Failed to create pool: {}", e)))?;

        Ok(Self {
            pool,
            schema: config.schema,
        })
    }

    /// Execute a statement and collect the first result set.
    ///
    /// Dropping the returned future before it completes cancels the
    /// statement on the server.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryRows, SourceError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SourceError::ConnectionFailed(format!("Failed to get connection: {}", e)))?;

        let mut in_flight = InFlight::new(client);
        let messages = in_flight.run(self.schema.as_deref(), sql).await;
        in_flight.finish();

        Ok(collect_rows(messages?))
    }
}

/// Pool configuration from structured connection parameters.
///
/// Parts are handed to the driver one by one, so credentials may contain
/// any character. A full `connection_string` is passed through as is.
fn pool_config(config: &ServerSourceConfig) -> Result<Config, SourceError> {
    let mut pool_config = Config::new();

    match config.connection_string {
        Some(ref url) => pool_config.url = Some(url.clone()),
        None => {
            pool_config.host = Some(config.host.clone().unwrap_or_else(|| "localhost".to_string()));
            pool_config.port = Some(config.port.unwrap_or(5432));
            pool_config.dbname = Some(
                config
                    .database
                    .clone()
                    .unwrap_or_else(|| "postgres".to_string()),
            );
            pool_config.user = Some(config.user.clone().unwrap_or_else(|| "postgres".to_string()));
            pool_config.password = config.resolve_password()?;
        }
    }

    pool_config.pool = Some(PoolConfig::new(config.pool_size.max(1)));
    Ok(pool_config)
}

/// A pooled client with a statement in flight.
///
/// If dropped before [`InFlight::finish`], the statement is cancelled on
/// the server and the connection is detached from the pool instead of
/// being handed to the next caller while still busy.
struct InFlight {
    client: Option<Object>,
    cancel: Option<CancelToken>,
}

impl InFlight {
    fn new(client: Object) -> Self {
        let cancel = Some(client.cancel_token());
        Self {
            client: Some(client),
            cancel,
        }
    }

    async fn run(
        &self,
        schema: Option<&str>,
        sql: &str,
    ) -> Result<Vec<SimpleQueryMessage>, SourceError> {
        let Some(client) = self.client.as_ref() else {
            return Err(SourceError::ConnectionFailed("connection released".to_string()));
        };

        if let Some(schema) = schema {
            client
                .batch_execute(&format!("SET search_path TO {}", schema))
                .await
                .map_err(classify_error)?;
        }

        client.simple_query(sql).await.map_err(classify_error)
    }

    /// The statement completed; the connection goes back to the pool.
    fn finish(&mut self) {
        self.cancel = None;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let (Some(token), Some(client)) = (self.cancel.take(), self.client.take()) else {
            return;
        };
        let client = Object::take(client);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Cancelling abandoned server query");
                handle.spawn(async move {
                    if let Err(e) = token.cancel_query(NoTls).await {
                        tracing::warn!(error = %e, "Failed to cancel server query");
                    }
                    drop(client);
                });
            }
            Err(_) => drop(client),
        }
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    fn kind(&self) -> &'static str {
        "server"
    }

    async fn query(&self, sql: &str) -> Result<QueryRows, SourceError> {
        tracing::debug!(query = %sql, schema = ?self.schema, "Executing server query");
        self.execute_query(sql).await
    }
}

/// Take the rows of the first statement that produced any.
fn collect_rows(messages: Vec<SimpleQueryMessage>) -> QueryRows {
    let mut result = QueryRows::default();

    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                if result.columns.is_empty() {
                    result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                let values = (0..row.len())
                    .map(|i| row.get(i).map(text_to_json).unwrap_or(Value::Null))
                    .collect();
                result.rows.push(values);
            }
            SimpleQueryMessage::CommandComplete(_) if !result.rows.is_empty() => break,
            _ => {}
        }
    }

    result
}

/// Map a driver error onto the source taxonomy.
///
/// Errors reported by the server for the statement are query failures;
/// closed connections and transport errors are connection failures.
fn classify_error(e: tokio_postgres::Error) -> SourceError {
    if e.is_closed() {
        return SourceError::ConnectionFailed(e.to_string());
    }
    match e.as_db_error() {
        Some(db) => SourceError::QueryFailed(format!("{} ({})", db.message(), db.code().code())),
        None => SourceError::ConnectionFailed(e.to_string()),
    }
}
