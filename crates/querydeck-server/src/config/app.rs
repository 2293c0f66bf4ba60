//! Application configuration for the QueryDeck server.

use serde::Deserialize;

/// Backend holding the expression table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory, seeded from the expressions file.
    Memory,
    /// PostgreSQL table configured through `POSTGRES_*`.
    Postgres,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `QUERYDECK_`:
/// - `QUERYDECK_HOST`: Server bind address (default: "0.0.0.0")
/// - `QUERYDECK_PORT`: Server port (default: 8090)
/// - `QUERYDECK_DEBUG`: Enable debug mode (default: false)
/// - `QUERYDECK_SERVER_NAME`: Server name for identification
/// - `QUERYDECK_SOURCES_FILE`: Sources file (default: "sources.yaml")
/// - `QUERYDECK_EXPRESSIONS_FILE`: Expression table to load at startup
/// - `QUERYDECK_STORE`: `memory` or `postgres` (default: memory)
/// - `QUERYDECK_LOG_FORMAT`: `text` or `json` (default: text)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Sources file path
    #[serde(default = "default_sources_file")]
    pub sources_file: String,

    /// Expressions file path (optional)
    #[serde(default)]
    pub expressions_file: Option<String>,

    /// Expression store backend
    #[serde(default = "default_store")]
    pub store: StoreBackend,

    /// Log output format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_server_name() -> String {
    "querydeck".to_string()
}

fn default_sources_file() -> String {
    "sources.yaml".to_string()
}

fn default_store() -> StoreBackend {
    StoreBackend::Memory
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `QUERYDECK_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("QUERYDECK_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            server_name: default_server_name(),
            sources_file: default_sources_file(),
            expressions_file: None,
            store: default_store(),
            log_format: default_log_format(),
        }
    }
}
