//! Background execution engine.
//!
//! Runs a list of rows one at a time on a spawned task. For every row the
//! engine reads the current work item from the store, executes its SQL on
//! the target source, extracts a scalar and records it. Row failures are
//! captured in the run state and never stop the remaining rows.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use querydeck_sources::{extract_scalar, SourceRegistry};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::publisher::StatusPublisher;
use super::run_state::{RowOutcome, RowStatus, RunPhase, SharedRunState, StartedRun, TransitionError};
use crate::store::{ExpressionStore, StoreError, WorkItem};

/// Engine errors surfaced to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A run is in progress")]
    RunInProgress,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reply to a run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStart {
    Started { run_id: Uuid },
    AlreadyRunning,
}

/// Reply to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// The run will end after the current row.
    Stopping,
    /// Nothing was running.
    NotRunning,
}

/// Sequential executor for expression rows.
///
/// Cheap to clone; all clones drive the same run state.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn ExpressionStore>,
    sources: Arc<SourceRegistry>,
    state: Arc<SharedRunState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn ExpressionStore>, sources: Arc<SourceRegistry>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                sources,
                state: Arc::new(SharedRunState::new()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Status access for pollers.
    pub fn publisher(&self) -> StatusPublisher {
        StatusPublisher::new(self.inner.state.clone())
    }

    pub fn store(&self) -> &Arc<dyn ExpressionStore> {
        &self.inner.store
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.inner.sources
    }

    /// Returns true unless the state machine is idle.
    pub fn is_running(&self) -> bool {
        self.inner.state.phase() != RunPhase::Idle
    }

    /// Start a run over `row_ids` in the given order.
    ///
    /// Returns immediately. When a run is already active the request is
    /// ignored and the current run is left untouched.
    pub fn run(&self, row_ids: Vec<String>) -> RunStart {
        // Held across start and spawn so handles are stored in run order.
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let started = match self.inner.state.transition(|s| s.start(&row_ids)) {
            Ok(run) => run,
            Err(e) => {
                tracing::info!(error = %e, "Run request ignored");
                return RunStart::AlreadyRunning;
            }
        };

        let run_id = started.run_id;
        tracing::info!(
            run_id = %run_id,
            rows = started.row_ids.len(),
            "Run started"
        );

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.execute_run(started).await }));

        RunStart::Started { run_id }
    }

    /// Start a run over every row in store order.
    pub async fn run_all(&self) -> Result<RunStart, EngineError> {
        let ids = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        Ok(self.run(ids))
    }

    /// Ask the active run to stop after its current row.
    pub fn stop(&self) -> StopRequest {
        match self.inner.state.transition(|s| s.request_stop()) {
            Ok(()) => {
                tracing::info!("Stop requested");
                StopRequest::Stopping
            }
            Err(_) => StopRequest::NotRunning,
        }
    }

    /// Replace the expression table. Rejected while a run is active.
    pub async fn reload(&self, items: Vec<WorkItem>) -> Result<usize, EngineError> {
        if self.is_running() {
            return Err(EngineError::RunInProgress);
        }
        let count = items.len();
        self.inner.store.replace_all(items).await?;
        Ok(count)
    }

    /// Wait for the most recently started run task to exit.
    pub async fn join(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Run task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("phase", &self.inner.state.phase())
            .field("sources", &self.inner.sources)
            .finish()
    }
}

/// Returns the state machine to idle however the run loop exits.
struct FinishGuard<'a> {
    state: &'a SharedRunState,
    run_id: Uuid,
    started: Instant,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let _ = self.state.transition(|s| Ok::<_, TransitionError>(s.finish()));
        let progress = self.state.snapshot().progress;
        tracing::info!(
            run_id = %self.run_id,
            succeeded = progress.succeeded,
            failed = progress.failed,
            pending = progress.pending,
            duration_ms = self.started.elapsed().as_millis() as u64,
            "Run finished"
        );
    }
}

impl EngineInner {
    async fn execute_run(&self, run: StartedRun) {
        let _finish = FinishGuard {
            state: &self.state,
            run_id: run.run_id,
            started: Instant::now(),
        };

        for id in &run.row_ids {
            match self.state.transition(|s| s.begin_row(id)) {
                Ok(()) => {}
                Err(TransitionError::InvalidPhase(RunPhase::StopRequested)) => {
                    tracing::info!(run_id = %run.run_id, "Stop observed, remaining rows left pending");
                    break;
                }
                Err(e) => {
                    tracing::error!(run_id = %run.run_id, row_id = %id, error = %e, "Cannot begin row");
                    break;
                }
            }

            let row_start = Instant::now();
            let (outcome, fatal) = self.execute_row(id).await;

            match outcome.status {
                RowStatus::Success => tracing::debug!(
                    run_id = %run.run_id,
                    row_id = %id,
                    duration_ms = row_start.elapsed().as_millis() as u64,
                    "Row succeeded"
                ),
                _ => tracing::warn!(
                    run_id = %run.run_id,
                    row_id = %id,
                    error_kind = outcome.error_kind.as_deref().unwrap_or_default(),
                    error = outcome.error_message.as_deref().unwrap_or_default(),
                    "Row failed"
                ),
            }

            if let Err(e) = self.state.transition(|s| s.complete_row(id, outcome)) {
                tracing::error!(run_id = %run.run_id, row_id = %id, error = %e, "Cannot complete row");
                break;
            }

            if let Some(e) = fatal {
                tracing::error!(
                    run_id = %run.run_id,
                    row_id = %id,
                    error = %e,
                    "Expression store unavailable, aborting run"
                );
                break;
            }
        }
    }

    /// Execute one row. The second element is set when the store itself
    /// failed and the run cannot continue.
    async fn execute_row(&self, id: &str) -> (RowOutcome, Option<StoreError>) {
        let item = match self.store.get(id).await {
            Ok(item) => item,
            Err(StoreError::NotFound(_)) => return (row_missing(id), None),
            Err(e) => return (store_failure(&e), Some(e)),
        };

        let value = match self
            .sources
            .execute(&item.target_source, &item.sql_text)
            .await
            .and_then(|rows| extract_scalar(&rows))
        {
            Ok(value) => value,
            Err(e) => return (RowOutcome::failed(e.kind(), e.detail(), Utc::now()), None),
        };

        let at = Utc::now();
        match self.store.record_result(id, value.clone(), at).await {
            Ok(()) => (RowOutcome::success(value, at), None),
            Err(StoreError::NotFound(_)) => (row_missing(id), None),
            Err(e) => (store_failure(&e), Some(e)),
        }
    }
}

fn row_missing(id: &str) -> RowOutcome {
    RowOutcome::failed("row_missing", format!("row missing: {id}"), Utc::now())
}

fn store_failure(e: &StoreError) -> RowOutcome {
    RowOutcome::failed("store_unavailable", e.to_string(), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryExpressionStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use querydeck_sources::{DataSource, QueryRows, RetryConfig, SourceError, SourcePolicy};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    fn scalar(value: Value) -> QueryRows {
        QueryRows::new(vec!["value".into()], vec![vec![value]])
    }

    /// Answers from a fixed table keyed by SQL text and records every call.
    #[derive(Default)]
    struct ScriptedSource {
        answers: HashMap<String, Result<QueryRows, SourceError>>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn answer(mut self, sql: &str, result: Result<QueryRows, SourceError>) -> Self {
            self.answers.insert(sql.to_string(), result);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn query(&self, sql: &str) -> Result<QueryRows, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(sql.to_string());

            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.answers
                .get(sql)
                .cloned()
                .unwrap_or_else(|| Err(SourceError::QueryFailed(format!("unexpected: {sql}"))))
        }
    }

    /// Announces each call, then blocks until a permit is released.
    struct GatedSource {
        started: mpsc::UnboundedSender<String>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl DataSource for GatedSource {
        fn kind(&self) -> &'static str {
            "gated"
        }

        async fn query(&self, sql: &str) -> Result<QueryRows, SourceError> {
            let _ = self.started.send(sql.to_string());
            self.gate.acquire().await.unwrap().forget();
            Ok(scalar(json!(1)))
        }
    }

    /// Memory store whose reads fail for one id.
    struct FlakyStore {
        inner: MemoryExpressionStore,
        broken_id: String,
    }

    #[async_trait]
    impl ExpressionStore for FlakyStore {
        async fn list(&self) -> Result<Vec<WorkItem>, StoreError> {
            self.inner.list().await
        }

        async fn get(&self, id: &str) -> Result<WorkItem, StoreError> {
            if id == self.broken_id {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.get(id).await
        }

        async fn record_result(
            &self,
            id: &str,
            value: Value,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.record_result(id, value, at).await
        }

        async fn replace_all(&self, items: Vec<WorkItem>) -> Result<(), StoreError> {
            self.inner.replace_all(items).await
        }

        async fn update_sql(
            &self,
            id: &str,
            sql_text: &str,
            target_source: Option<&str>,
        ) -> Result<WorkItem, StoreError> {
            self.inner.update_sql(id, sql_text, target_source).await
        }
    }

    fn policy() -> SourcePolicy {
        SourcePolicy {
            timeout: Duration::from_secs(10),
            retry: RetryConfig::disabled(),
        }
    }

    fn registry_with(name: &str, source: Arc<dyn DataSource>) -> Arc<SourceRegistry> {
        let mut registry = SourceRegistry::new();
        registry.register_arc(name, source, policy());
        Arc::new(registry)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn engine_with(
        items: Vec<WorkItem>,
        source: Arc<dyn DataSource>,
    ) -> (ExecutionEngine, Arc<MemoryExpressionStore>) {
        let store = Arc::new(MemoryExpressionStore::with_items(items).unwrap());
        let engine = ExecutionEngine::new(store.clone(), registry_with("erp", source));
        (engine, store)
    }

    #[tokio::test]
    async fn test_value_and_empty_result() {
        let source = Arc::new(
            ScriptedSource::default()
                .answer("SELECT 42 AS value", Ok(scalar(json!(42))))
                .answer(
                    "SELECT x FROM t WHERE 1=0",
                    Ok(QueryRows::empty(vec!["x".into()])),
                ),
        );
        let (engine, store) = engine_with(
            vec![
                WorkItem::new("A", "erp", "SELECT 42 AS value"),
                WorkItem::new("B", "erp", "SELECT x FROM t WHERE 1=0"),
            ],
            source,
        );

        assert!(matches!(
            engine.run(ids(&["A", "B"])),
            RunStart::Started { .. }
        ));
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);
        assert!(snap.active_row_id.is_none());

        let a = snap.outcome("A").unwrap();
        assert_eq!(a.status, RowStatus::Success);
        assert_eq!(a.value, Some(json!(42)));

        let b = snap.outcome("B").unwrap();
        assert_eq!(b.status, RowStatus::Failed);
        assert_eq!(b.error_kind.as_deref(), Some("query_failed"));
        assert_eq!(b.error_message.as_deref(), Some("no rows returned"));

        assert_eq!(store.get("A").await.unwrap().last_value, Some(json!(42)));
        assert!(store.get("B").await.unwrap().last_value.is_none());
    }

    #[tokio::test]
    async fn test_rows_run_in_request_order_one_at_a_time() {
        let source = Arc::new(
            ScriptedSource::default()
                .answer("SELECT 1", Ok(scalar(json!(1))))
                .answer("SELECT 2", Ok(scalar(json!(2))))
                .answer("SELECT 3", Ok(scalar(json!(3)))),
        );
        let (engine, _) = engine_with(
            vec![
                WorkItem::new("a", "erp", "SELECT 1"),
                WorkItem::new("b", "erp", "SELECT 2"),
                WorkItem::new("c", "erp", "SELECT 3"),
            ],
            source.clone(),
        );

        engine.run(ids(&["c", "a", "b", "a"]));
        engine.join().await;

        assert_eq!(source.calls(), vec!["SELECT 3", "SELECT 1", "SELECT 2"]);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(engine.publisher().snapshot().progress.succeeded, 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_run() {
        let source = Arc::new(
            ScriptedSource::default()
                .answer("SELECT 1", Ok(scalar(json!(1))))
                .answer("SELEC", Err(SourceError::QueryFailed("syntax error".into())))
                .answer("SELECT 0", Ok(scalar(json!(0)))),
        );
        let (engine, _) = engine_with(
            vec![
                WorkItem::new("a", "erp", "SELECT 1"),
                WorkItem::new("b", "erp", "SELEC"),
                WorkItem::new("c", "nowhere", "SELECT 1"),
                WorkItem::new("d", "erp", "SELECT 0"),
            ],
            source,
        );

        engine.run_all().await.unwrap();
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.outcome("a").unwrap().status, RowStatus::Success);
        assert_eq!(
            snap.outcome("b").unwrap().error_message.as_deref(),
            Some("syntax error")
        );
        assert_eq!(
            snap.outcome("c").unwrap().error_kind.as_deref(),
            Some("unknown_source")
        );

        // Zero is a value, not a failure.
        let d = snap.outcome("d").unwrap();
        assert_eq!(d.status, RowStatus::Success);
        assert_eq!(d.value, Some(json!(0)));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_value() {
        let source = Arc::new(
            ScriptedSource::default()
                .answer("SELECT broken", Err(SourceError::QueryFailed("boom".into()))),
        );
        let mut item = WorkItem::new("a", "erp", "SELECT broken");
        item.last_value = Some(json!(7));
        let (engine, store) = engine_with(vec![item], source);

        engine.run(ids(&["a"]));
        engine.join().await;

        assert_eq!(store.get("a").await.unwrap().last_value, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_missing_row_fails_without_querying() {
        let source = Arc::new(ScriptedSource::default().answer("SELECT 1", Ok(scalar(json!(1)))));
        let (engine, _) = engine_with(vec![WorkItem::new("a", "erp", "SELECT 1")], source.clone());

        engine.run(ids(&["ghost", "a"]));
        engine.join().await;

        let snap = engine.publisher().snapshot();
        let ghost = snap.outcome("ghost").unwrap();
        assert_eq!(ghost.status, RowStatus::Failed);
        assert_eq!(ghost.error_kind.as_deref(), Some("row_missing"));
        assert_eq!(ghost.error_message.as_deref(), Some("row missing: ghost"));
        assert_eq!(snap.outcome("a").unwrap().status, RowStatus::Success);
        assert_eq!(source.calls(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_store_outage_aborts_run() {
        let source = Arc::new(ScriptedSource::default().answer("SELECT 1", Ok(scalar(json!(1)))));
        let store = Arc::new(FlakyStore {
            inner: MemoryExpressionStore::with_items(vec![
                WorkItem::new("a", "erp", "SELECT 1"),
                WorkItem::new("b", "erp", "SELECT 1"),
                WorkItem::new("c", "erp", "SELECT 1"),
            ])
            .unwrap(),
            broken_id: "b".to_string(),
        });
        let engine = ExecutionEngine::new(store, registry_with("erp", source));

        engine.run(ids(&["a", "b", "c"]));
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);
        assert_eq!(snap.outcome("a").unwrap().status, RowStatus::Success);
        assert_eq!(
            snap.outcome("b").unwrap().error_kind.as_deref(),
            Some("store_unavailable")
        );
        assert_eq!(snap.outcome("c").unwrap().status, RowStatus::Pending);
    }

    #[tokio::test]
    async fn test_stop_lets_current_row_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(GatedSource {
            started: tx,
            gate: gate.clone(),
        });
        let (engine, _) = engine_with(
            vec![
                WorkItem::new("a", "erp", "SELECT a"),
                WorkItem::new("b", "erp", "SELECT b"),
                WorkItem::new("c", "erp", "SELECT c"),
            ],
            source,
        );

        engine.run(ids(&["a", "b", "c"]));
        assert_eq!(rx.recv().await.as_deref(), Some("SELECT a"));

        assert_eq!(engine.stop(), StopRequest::Stopping);
        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::StopRequested);
        assert_eq!(snap.active_row_id.as_deref(), Some("a"));

        gate.add_permits(10);
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);
        assert_eq!(snap.outcome("a").unwrap().status, RowStatus::Success);
        assert_eq!(snap.outcome("b").unwrap().status, RowStatus::Pending);
        assert_eq!(snap.outcome("c").unwrap().status, RowStatus::Pending);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_run_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(GatedSource {
            started: tx,
            gate: gate.clone(),
        });
        let (engine, _) = engine_with(
            vec![
                WorkItem::new("a", "erp", "SELECT a"),
                WorkItem::new("b", "erp", "SELECT b"),
            ],
            source,
        );

        let first = engine.run(ids(&["a", "b"]));
        rx.recv().await;
        let before = engine.publisher().snapshot();

        assert_eq!(engine.run(ids(&["b"])), RunStart::AlreadyRunning);
        assert_eq!(*engine.publisher().snapshot(), *before);
        assert!(matches!(first, RunStart::Started { run_id } if Some(run_id) == before.run_id));

        gate.add_permits(10);
        engine.join().await;
        assert_eq!(engine.publisher().snapshot().progress.succeeded, 2);
    }

    #[tokio::test]
    async fn test_reload_rejected_while_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(GatedSource {
            started: tx,
            gate: gate.clone(),
        });
        let (engine, store) = engine_with(vec![WorkItem::new("a", "erp", "SELECT a")], source);

        engine.run(ids(&["a"]));
        rx.recv().await;
        assert!(engine.is_running());

        let err = engine
            .reload(vec![WorkItem::new("z", "erp", "SELECT z")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RunInProgress));

        gate.add_permits(1);
        engine.join().await;

        let count = engine
            .reload(vec![WorkItem::new("z", "erp", "SELECT z")])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.get("a").await.is_err());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let (engine, _) = engine_with(Vec::new(), Arc::new(ScriptedSource::default()));
        assert_eq!(engine.stop(), StopRequest::NotRunning);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_empty_run_returns_to_idle() {
        let (engine, _) = engine_with(Vec::new(), Arc::new(ScriptedSource::default()));
        assert!(matches!(engine.run(Vec::new()), RunStart::Started { .. }));
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);
        assert_eq!(snap.progress.total, 0);
        assert!(snap.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_join_waits_for_the_latest_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(GatedSource {
            started: tx,
            gate: gate.clone(),
        });
        let (engine, _) = engine_with(vec![WorkItem::new("a", "erp", "SELECT a")], source);

        // The first run finishes on its own and is never joined.
        engine.run(Vec::new());
        while engine.is_running() {
            tokio::task::yield_now().await;
        }

        let second = engine.run(ids(&["a"]));
        assert!(matches!(second, RunStart::Started { .. }));
        rx.recv().await;

        let joiner = tokio::spawn({
            let engine = engine.clone();
            async move { engine.join().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished());

        gate.add_permits(1);
        joiner.await.unwrap();
        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);
        assert_eq!(snap.progress.succeeded, 1);
    }

    /// Never answers `SELECT slow`; answers everything else with 1.
    struct HangingSource;

    #[async_trait]
    impl DataSource for HangingSource {
        fn kind(&self) -> &'static str {
            "hanging"
        }

        async fn query(&self, sql: &str) -> Result<QueryRows, SourceError> {
            if sql == "SELECT slow" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(scalar(json!(1)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_row_fails_and_run_continues() {
        let (engine, _) = engine_with(
            vec![
                WorkItem::new("slow", "erp", "SELECT slow"),
                WorkItem::new("fast", "erp", "SELECT fast"),
            ],
            Arc::new(HangingSource),
        );

        engine.run(ids(&["slow", "fast"]));
        engine.join().await;

        let snap = engine.publisher().snapshot();
        assert_eq!(snap.phase, RunPhase::Idle);

        let slow = snap.outcome("slow").unwrap();
        assert_eq!(slow.status, RowStatus::Failed);
        assert_eq!(slow.error_kind.as_deref(), Some("timeout"));
        assert_eq!(slow.error_message.as_deref(), Some("timed out after 10 seconds"));

        let fast = snap.outcome("fast").unwrap();
        assert_eq!(fast.status, RowStatus::Success);
        assert_eq!(fast.value, Some(json!(1)));
    }

    #[test]
    fn test_run_start_serialization() {
        let json = serde_json::to_value(RunStart::AlreadyRunning).unwrap();
        assert_eq!(json, json!({ "status": "already_running" }));

        let run_id = Uuid::new_v4();
        let json = serde_json::to_value(RunStart::Started { run_id }).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["run_id"], run_id.to_string());
    }
}
