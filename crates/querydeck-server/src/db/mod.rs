//! Database module for the PostgreSQL expression store.
//!
//! Connection pooling and the queries behind [`crate::store::PgExpressionStore`].

pub mod pool;
pub mod queries;

pub use pool::{create_pool, DbPool};
