//! QueryDeck Server Library
//!
//! Background execution of dashboard SQL expressions with per-row status:
//!
//! - **Expression store**: the ordered table of rows, in memory or in PostgreSQL
//! - **Execution engine**: runs rows one at a time on a background task,
//!   isolating failures per row and honouring stop requests between rows
//! - **Status publishing**: immutable snapshots for pollers
//! - **HTTP API**: run control, status, expression admin and source checks
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: PostgreSQL pool and queries for the persistent store
//! - [`engine`]: Run state machine, executor and status publisher
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`state`]: Shared application state
//! - [`store`]: Expression store trait and backends
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use querydeck_server::{config::AppConfig, router::build_router, state::AppState,
//!     store::MemoryExpressionStore};
//! use querydeck_sources::{SourceRegistry, SourcesConfig};
//!
//! let sources = SourceRegistry::from_config(&SourcesConfig::load("sources.yaml")?)?;
//! let state = AppState::new(
//!     Arc::new(MemoryExpressionStore::new()),
//!     Arc::new(sources),
//!     AppConfig::default(),
//! );
//! let app = build_router(state);
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod result_ext;
pub mod router;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
