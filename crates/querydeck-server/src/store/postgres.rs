//! PostgreSQL expression store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ensure_unique, ExpressionStore, StoreError, WorkItem};
use crate::db::pool::health_check;
use crate::db::{queries, DbPool};

/// Expression store persisted in `querydeck.expression`.
#[derive(Clone)]
pub struct PgExpressionStore {
    pool: DbPool,
}

impl PgExpressionStore {
    /// Create a store on an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the schema and table if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        queries::ensure_schema(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ExpressionStore for PgExpressionStore {
    async fn list(&self) -> Result<Vec<WorkItem>, StoreError> {
        let rows = queries::list_expressions(&self.pool).await?;
        Ok(rows.into_iter().map(WorkItem::from).collect())
    }

    async fn get(&self, id: &str) -> Result<WorkItem, StoreError> {
        queries::get_expression(&self.pool, id)
            .await?
            .map(WorkItem::from)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn record_result(
        &self,
        id: &str,
        value: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match queries::record_value(&self.pool, id, &value, at).await? {
            0 => Err(StoreError::NotFound(id.to_string())),
            _ => Ok(()),
        }
    }

    async fn replace_all(&self, items: Vec<WorkItem>) -> Result<(), StoreError> {
        ensure_unique(&items)?;
        queries::replace_expressions(&self.pool, &items).await?;
        tracing::info!(count = items.len(), "Expression table replaced");
        Ok(())
    }

    async fn update_sql(
        &self,
        id: &str,
        sql_text: &str,
        target_source: Option<&str>,
    ) -> Result<WorkItem, StoreError> {
        queries::update_sql(&self.pool, id, sql_text, target_source)
            .await?
            .map(WorkItem::from)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn health_check(&self) -> bool {
        health_check(&self.pool).await
    }
}
