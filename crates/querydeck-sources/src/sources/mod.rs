//! Built-in source adapters.
//!
//! - `server` - Server-style relational databases over the PostgreSQL protocol
//! - `file` - Local DuckDB database files

mod duckdb;
mod postgres;

pub use self::duckdb::DuckdbSource;
pub use self::postgres::PostgresSource;
