//! Source execution error types.

use thiserror::Error;

/// Errors that can occur while executing a statement against a source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be reached or opened.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The source was reachable but the statement errored.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The call exceeded its wall-clock bound.
    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    /// No source is registered under this name.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Invalid source configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SourceError {
    /// Returns true for connection failures, the only retryable kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::ConnectionFailed(_))
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::ConnectionFailed(_) => "connection_failed",
            SourceError::QueryFailed(_) => "query_failed",
            SourceError::Timeout(_) => "timeout",
            SourceError::UnknownSource(_) => "unknown_source",
            SourceError::Configuration(_) => "configuration",
        }
    }

    /// Error message without the kind prefix, as shown next to a failed row.
    pub fn detail(&self) -> String {
        match self {
            SourceError::ConnectionFailed(msg)
            | SourceError::QueryFailed(msg)
            | SourceError::Configuration(msg) => msg.clone(),
            SourceError::Timeout(secs) => format!("timed out after {secs} seconds"),
            SourceError::UnknownSource(name) => format!("unknown source: {name}"),
        }
    }
}

impl From<serde_yaml::Error> for SourceError {
    fn from(e: serde_yaml::Error) -> Self {
        SourceError::Configuration(e.to_string())
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Configuration(e.to_string())
    }
}
