//! Configuration module for the QueryDeck server.
//!
//! Process settings come from environment variables through `envy`;
//! source connection parameters come from the sources file.

mod app;
mod database;

pub use app::{AppConfig, LogFormat, StoreBackend};
pub use database::DatabaseConfig;
