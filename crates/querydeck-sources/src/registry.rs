//! Source registry and dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{SourceSettings, SourcesConfig};
use crate::error::SourceError;
use crate::result::QueryRows;
use crate::sources::{DuckdbSource, PostgresSource};

/// Retry configuration for connection failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Call policy applied to every statement sent to a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePolicy {
    /// Wall-clock bound for one attempt.
    pub timeout: Duration,

    /// Retry policy for connection failures.
    pub retry: RetryConfig,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// An external data source that executes fully formed SQL text.
///
/// Implementations must not cache results and must be safe to call
/// repeatedly; re-running a statement simply queries the source again.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Adapter kind (e.g., "server", "file").
    fn kind(&self) -> &'static str;

    /// Execute one statement and return its rows.
    async fn query(&self, sql: &str) -> Result<QueryRows, SourceError>;

    /// Verify that the source is reachable.
    async fn ping(&self) -> Result<(), SourceError> {
        self.query("SELECT 1").await.map(|_| ())
    }
}

struct RegisteredSource {
    source: Arc<dyn DataSource>,
    policy: SourcePolicy,
}

/// Summary of a registered source for the admin panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    pub kind: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Registry of named sources.
pub struct SourceRegistry {
    sources: BTreeMap<String, RegisteredSource>,
}

impl SourceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Build a registry with one adapter per configured source.
    pub fn from_config(config: &SourcesConfig) -> Result<Self, SourceError> {
        let mut registry = Self::new();

        for (name, entry) in &config.sources {
            let policy = SourcePolicy {
                timeout: Duration::from_secs(
                    entry.timeout_secs.unwrap_or(config.default_timeout_secs),
                ),
                retry: entry.retry.clone().unwrap_or_else(|| config.retry.clone()),
            };

            match &entry.settings {
                SourceSettings::Server(server) => {
                    registry.register(name, PostgresSource::new(server.clone())?, policy);
                }
                SourceSettings::File(file) => {
                    registry.register(name, DuckdbSource::new(file.clone()), policy);
                }
            }

            tracing::info!(
                source = %name,
                kind = entry.settings.kind(),
                "Registered data source"
            );
        }

        Ok(registry)
    }

    /// Register a source under a name, replacing any previous one.
    pub fn register<S: DataSource + 'static>(
        &mut self,
        name: impl Into<String>,
        source: S,
        policy: SourcePolicy,
    ) {
        self.register_arc(name, Arc::new(source), policy);
    }

    /// Register an already shared source.
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
        policy: SourcePolicy,
    ) {
        self.sources
            .insert(name.into(), RegisteredSource { source, policy });
    }

    /// Check if a source is registered.
    pub fn has(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// List all registered source names.
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(|s| s.as_str()).collect()
    }

    /// Describe all registered sources.
    pub fn describe(&self) -> Vec<SourceInfo> {
        self.sources
            .iter()
            .map(|(name, entry)| SourceInfo {
                name: name.clone(),
                kind: entry.source.kind().to_string(),
                timeout_secs: entry.policy.timeout.as_secs(),
                max_retries: entry.policy.retry.max_retries,
            })
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&RegisteredSource, SourceError> {
        self.sources
            .get(name)
            .ok_or_else(|| SourceError::UnknownSource(name.to_string()))
    }

    /// Execute a statement against a named source.
    ///
    /// Each attempt is bounded by the source timeout. Connection failures
    /// are retried with exponential backoff; every other error is returned
    /// as is.
    pub async fn execute(&self, name: &str, sql: &str) -> Result<QueryRows, SourceError> {
        let entry = self.lookup(name)?;
        let start = Instant::now();

        let result = with_retry(name, &entry.policy, || {
            bounded(entry.policy.timeout, entry.source.query(sql))
        })
        .await;

        match &result {
            Ok(rows) => tracing::debug!(
                source = %name,
                row_count = rows.row_count(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Statement executed"
            ),
            Err(e) => tracing::debug!(
                source = %name,
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Statement failed"
            ),
        }

        result
    }

    /// Check connectivity of a named source under its call policy.
    pub async fn check(&self, name: &str) -> Result<Duration, SourceError> {
        let entry = self.lookup(name)?;
        let start = Instant::now();
        with_retry(name, &entry.policy, || {
            bounded(entry.policy.timeout, entry.source.ping())
        })
        .await?;
        Ok(start.elapsed())
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, SourceError>
where
    F: std::future::Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit.as_secs())),
    }
}

async fn with_retry<T, F, Fut>(name: &str, policy: &SourcePolicy, mut call: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_retryable() && attempt < policy.retry.max_retries => {
                attempt += 1;
                let delay = policy.retry.delay_for(attempt);
                tracing::warn!(
                    source = %name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockSource {
        calls: Arc<AtomicU32>,
        fail_first: u32,
        error: SourceError,
    }

    impl MockSource {
        fn failing(fail_first: u32, error: SourceError) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail_first,
                    error,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl DataSource for MockSource {
        fn kind(&self) -> &'static str {
            "mock"
        }

        async fn query(&self, _sql: &str) -> Result<QueryRows, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(self.error.clone());
            }
            Ok(QueryRows::new(vec!["value".into()], vec![vec![json!(42)]]))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl DataSource for SlowSource {
        fn kind(&self) -> &'static str {
            "slow"
        }

        async fn query(&self, _sql: &str) -> Result<QueryRows, SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(QueryRows::default())
        }
    }

    fn policy(max_retries: u32) -> SourcePolicy {
        SourcePolicy {
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            },
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = SourceRegistry::new();
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_registry_register() {
        let mut registry = SourceRegistry::new();
        let (source, _) = MockSource::failing(0, SourceError::QueryFailed("x".into()));
        registry.register("erp", source, policy(0));

        assert!(registry.has("erp"));
        assert!(!registry.has("ledger"));
        assert_eq!(registry.names(), vec!["erp"]);

        let info = registry.describe();
        assert_eq!(info[0].kind, "mock");
        assert_eq!(info[0].timeout_secs, 5);
    }

    #[test]
    fn test_retry_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(10), Duration::from_millis(10000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_is_retried() {
        let mut registry = SourceRegistry::new();
        let (source, calls) =
            MockSource::failing(2, SourceError::ConnectionFailed("refused".into()));
        registry.register("erp", source, policy(3));

        let rows = registry.execute("erp", "SELECT 42 AS value").await.unwrap();
        assert_eq!(rows.row_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_capped() {
        let mut registry = SourceRegistry::new();
        let (source, calls) =
            MockSource::failing(10, SourceError::ConnectionFailed("refused".into()));
        registry.register("erp", source, policy(2));

        let err = registry.execute("erp", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, SourceError::ConnectionFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_query_failure_is_not_retried() {
        let mut registry = SourceRegistry::new();
        let (source, calls) = MockSource::failing(10, SourceError::QueryFailed("syntax".into()));
        registry.register("erp", source, policy(5));

        let err = registry.execute("erp", "SELEC 1").await.unwrap_err();
        assert!(matches!(err, SourceError::QueryFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_the_call() {
        let mut registry = SourceRegistry::new();
        registry.register("slow", SlowSource, policy(3));

        let err = registry.execute("slow", "SELECT 1").await.unwrap_err();
        assert_eq!(err, SourceError::Timeout(5));
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let registry = SourceRegistry::new();
        let err = registry.execute("nope", "SELECT 1").await.unwrap_err();
        assert_eq!(err, SourceError::UnknownSource("nope".to_string()));
    }

    #[tokio::test]
    async fn test_check_uses_ping() {
        let mut registry = SourceRegistry::new();
        let (source, calls) = MockSource::failing(0, SourceError::QueryFailed("x".into()));
        registry.register("erp", source, policy(0));

        registry.check("erp").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_config_builds_adapters() {
        let config = SourcesConfig::from_yaml(
            r#"
default_timeout_secs: 12
sources:
  erp:
    kind: server
    connection_string: postgresql://dash@localhost/sales
  ledger:
    kind: file
    path: /tmp/ledger.duckdb
    timeout_secs: 3
    retry:
      max_retries: 0
"#,
        )
        .unwrap();

        let registry = SourceRegistry::from_config(&config).unwrap();
        let info = registry.describe();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "erp");
        assert_eq!(info[0].kind, "server");
        assert_eq!(info[0].timeout_secs, 12);
        assert_eq!(info[1].name, "ledger");
        assert_eq!(info[1].kind, "file");
        assert_eq!(info[1].timeout_secs, 3);
        assert_eq!(info[1].max_retries, 0);
    }
}
