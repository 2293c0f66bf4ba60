//! In-memory expression store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ensure_unique, ExpressionStore, StoreError, WorkItem};

#[derive(Debug, Default)]
struct Table {
    items: Vec<WorkItem>,
    index: HashMap<String, usize>,
}

impl Table {
    fn from_items(items: Vec<WorkItem>) -> Self {
        let index = items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id.clone(), pos))
            .collect();
        Self { items, index }
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut WorkItem, StoreError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(&mut self.items[pos])
    }
}

/// Expression store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryExpressionStore {
    table: RwLock<Table>,
}

impl MemoryExpressionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given items.
    pub fn with_items(items: Vec<WorkItem>) -> Result<Self, StoreError> {
        ensure_unique(&items)?;
        Ok(Self {
            table: RwLock::new(Table::from_items(items)),
        })
    }
}

#[async_trait]
impl ExpressionStore for MemoryExpressionStore {
    async fn list(&self) -> Result<Vec<WorkItem>, StoreError> {
        Ok(self.table.read().await.items.clone())
    }

    async fn get(&self, id: &str) -> Result<WorkItem, StoreError> {
        let table = self.table.read().await;
        table
            .index
            .get(id)
            .map(|&pos| table.items[pos].clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn record_result(
        &self,
        id: &str,
        value: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        let item = table.get_mut(id)?;
        item.last_value = Some(value);
        item.last_updated = Some(at);
        Ok(())
    }

    async fn replace_all(&self, items: Vec<WorkItem>) -> Result<(), StoreError> {
        ensure_unique(&items)?;
        let count = items.len();
        *self.table.write().await = Table::from_items(items);
        tracing::info!(count, "Expression table replaced");
        Ok(())
    }

    async fn update_sql(
        &self,
        id: &str,
        sql_text: &str,
        target_source: Option<&str>,
    ) -> Result<WorkItem, StoreError> {
        let mut table = self.table.write().await;
        let item = table.get_mut(id)?;
        item.sql_text = sql_text.to_string();
        if let Some(source) = target_source {
            item.target_source = source.to_string();
        }
        Ok(item.clone())
    }
}
