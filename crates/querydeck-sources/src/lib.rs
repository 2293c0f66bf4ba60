//! QueryDeck Source Library
//!
//! Data source adapters used to refresh dashboard expressions.
//!
//! This crate provides:
//! - A [`DataSource`] trait and a named [`SourceRegistry`]
//! - Built-in adapters: a server source and a local file source
//! - Per-source timeouts and bounded retry of connection failures
//! - Scalar extraction from result sets ([`extract_scalar`])

pub mod config;
pub mod error;
pub mod registry;
pub mod result;
pub mod sources;

pub use config::{FileSourceConfig, ServerSourceConfig, SourceEntry, SourceSettings, SourcesConfig};
pub use error::SourceError;
pub use registry::{DataSource, RetryConfig, SourceInfo, SourcePolicy, SourceRegistry};
pub use result::{extract_scalar, QueryRows};
