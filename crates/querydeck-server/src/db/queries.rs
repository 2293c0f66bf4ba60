//! Expression table queries.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::db::DbPool;
use crate::store::WorkItem;

/// Schema and table backing the PostgreSQL expression store.
pub const SCHEMA_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS querydeck;
CREATE TABLE IF NOT EXISTS querydeck.expression (
    id            TEXT PRIMARY KEY,
    position      INTEGER NOT NULL,
    target_source TEXT NOT NULL,
    sql_text      TEXT NOT NULL,
    label         TEXT,
    last_value    JSONB,
    last_updated  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS expression_position_idx ON querydeck.expression (position);
"#;

/// Row of `querydeck.expression`.
#[derive(Debug, Clone, FromRow)]
pub struct ExpressionRow {
    pub id: String,
    pub target_source: String,
    pub sql_text: String,
    #[sqlx(default)]
    pub label: Option<String>,
    #[sqlx(default)]
    pub last_value: Option<serde_json::Value>,
    #[sqlx(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<ExpressionRow> for WorkItem {
    fn from(row: ExpressionRow) -> Self {
        WorkItem {
            id: row.id,
            target_source: row.target_source,
            sql_text: row.sql_text,
            label: row.label,
            last_value: row.last_value,
            last_updated: row.last_updated,
        }
    }
}

/// Create the schema and table if missing.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_DDL).execute(pool).await?;
    Ok(())
}

/// List all expressions in table order.
pub async fn list_expressions(pool: &DbPool) -> Result<Vec<ExpressionRow>, sqlx::Error> {
    sqlx::query_as::<_, ExpressionRow>(
        r#"
        SELECT id, target_source, sql_text, label, last_value, last_updated
        FROM querydeck.expression
        ORDER BY position
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Get one expression by id.
pub async fn get_expression(pool: &DbPool, id: &str) -> Result<Option<ExpressionRow>, sqlx::Error> {
    sqlx::query_as::<_, ExpressionRow>(
        r#"
        SELECT id, target_source, sql_text, label, last_value, last_updated
        FROM querydeck.expression
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Store a value. Returns the number of rows touched.
pub async fn record_value(
    pool: &DbPool,
    id: &str,
    value: &serde_json::Value,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE querydeck.expression
        SET last_value = $2, last_updated = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(value)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Change the SQL text (and optionally the source) of one expression.
pub async fn update_sql(
    pool: &DbPool,
    id: &str,
    sql_text: &str,
    target_source: Option<&str>,
) -> Result<Option<ExpressionRow>, sqlx::Error> {
    sqlx::query_as::<_, ExpressionRow>(
        r#"
        UPDATE querydeck.expression
        SET sql_text = $2, target_source = COALESCE($3, target_source)
        WHERE id = $1
        RETURNING id, target_source, sql_text, label, last_value, last_updated
        "#,
    )
    .bind(id)
    .bind(sql_text)
    .bind(target_source)
    .fetch_optional(pool)
    .await
}

/// Replace the whole table in one transaction.
pub async fn replace_expressions(pool: &DbPool, items: &[WorkItem]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM querydeck.expression")
        .execute(&mut *tx)
        .await?;

    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO querydeck.expression
                (id, position, target_source, sql_text, label, last_value, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&item.id)
        .bind(position as i32)
        .bind(&item.target_source)
        .bind(&item.sql_text)
        .bind(&item.label)
        .bind(&item.last_value)
        .bind(item.last_updated)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}
