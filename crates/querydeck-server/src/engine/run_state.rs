//! Run state machine.
//!
//! Tracks the (at most one) execution run: its phase, the active row and
//! the outcome of every row. Writers go through [`SharedRunState`], which
//! publishes an immutable [`RunStateView`] after every transition so that
//! pollers never wait on the run loop.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Phase of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in progress.
    Idle,
    /// Rows are being executed.
    Running,
    /// A stop was requested; the loop exits after the current row.
    StopRequested,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
        }
    }
}

/// Status of one row within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RowStatus {
    /// Returns true for `Success` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowStatus::Success | RowStatus::Failed)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result record for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RowOutcome {
    /// A row that has not started.
    pub fn pending() -> Self {
        Self {
            status: RowStatus::Pending,
            value: None,
            error_kind: None,
            error_message: None,
            completed_at: None,
        }
    }

    /// A successful row.
    pub fn success(value: serde_json::Value, at: DateTime<Utc>) -> Self {
        Self {
            status: RowStatus::Success,
            value: Some(value),
            error_kind: None,
            error_message: None,
            completed_at: Some(at),
        }
    }

    /// A failed row.
    pub fn failed(kind: impl Into<String>, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: RowStatus::Failed,
            value: None,
            error_kind: Some(kind.into()),
            error_message: Some(message.into()),
            completed_at: Some(at),
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Transition not allowed in phase {0}")]
    InvalidPhase(RunPhase),

    #[error("Row {0} is not part of the current run")]
    UnknownRow(String),

    #[error("Row {active} is still active, cannot begin {requested}")]
    RowActive { active: String, requested: String },

    #[error("Row {0} is not the active row")]
    NotActive(String),

    #[error("Row {0} already reached a terminal status")]
    AlreadyTerminal(String),

    #[error("Outcome for row {0} is not terminal")]
    NotTerminal(String),
}

/// Counts of rows per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Read-only point-in-time copy of the run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStateView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub phase: RunPhase,
    pub active_row_id: Option<String>,
    /// Row ids of the run in execution order.
    pub row_ids: Vec<String>,
    pub outcomes: HashMap<String, RowOutcome>,
    pub progress: RunProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStateView {
    /// Outcome of one row, if it is part of the run.
    pub fn outcome(&self, id: &str) -> Option<&RowOutcome> {
        self.outcomes.get(id)
    }
}

/// A run accepted by [`RunState::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRun {
    pub run_id: Uuid,
    /// Row ids in execution order, duplicates removed.
    pub row_ids: Vec<String>,
}

/// The run state machine.
///
/// `Idle -> Running -> Idle`, with `Running -> StopRequested -> Idle` as
/// the cancellation path.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: Option<Uuid>,
    phase: RunPhase,
    active_row_id: Option<String>,
    row_ids: Vec<String>,
    outcomes: HashMap<String, RowOutcome>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// An idle state with no previous run.
    pub fn new() -> Self {
        Self {
            run_id: None,
            phase: RunPhase::Idle,
            active_row_id: None,
            row_ids: Vec::new(),
            outcomes: HashMap::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn active_row_id(&self) -> Option<&str> {
        self.active_row_id.as_deref()
    }

    pub fn outcome(&self, id: &str) -> Option<&RowOutcome> {
        self.outcomes.get(id)
    }

    /// Start a run over `row_ids`. Only legal when idle.
    ///
    /// Every row starts `Pending`; outcomes of the previous run are dropped.
    pub fn start(&mut self, row_ids: &[String]) -> Result<StartedRun, TransitionError> {
        if self.phase != RunPhase::Idle {
            return Err(TransitionError::AlreadyRunning);
        }

        let mut seen = HashSet::with_capacity(row_ids.len());
        let ordered: Vec<String> = row_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        self.phase = RunPhase::Running;
        self.active_row_id = None;
        self.outcomes = ordered
            .iter()
            .map(|id| (id.clone(), RowOutcome::pending()))
            .collect();
        self.row_ids = ordered.clone();
        self.started_at = Some(Utc::now());
        self.finished_at = None;

        Ok(StartedRun {
            run_id,
            row_ids: ordered,
        })
    }

    /// Mark a pending row as running. Only legal in `Running`.
    pub fn begin_row(&mut self, id: &str) -> Result<(), TransitionError> {
        if self.phase != RunPhase::Running {
            return Err(TransitionError::InvalidPhase(self.phase));
        }
        if let Some(active) = &self.active_row_id {
            return Err(TransitionError::RowActive {
                active: active.clone(),
                requested: id.to_string(),
            });
        }

        let outcome = self
            .outcomes
            .get_mut(id)
            .ok_or_else(|| TransitionError::UnknownRow(id.to_string()))?;
        if outcome.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(id.to_string()));
        }

        outcome.status = RowStatus::Running;
        self.active_row_id = Some(id.to_string());
        Ok(())
    }

    /// Record the terminal outcome of the active row.
    ///
    /// Legal in `Running` and in `StopRequested`, so the row in flight when
    /// a stop arrives still reaches a terminal status.
    pub fn complete_row(&mut self, id: &str, outcome: RowOutcome) -> Result<(), TransitionError> {
        if self.phase == RunPhase::Idle {
            return Err(TransitionError::InvalidPhase(self.phase));
        }
        if !outcome.status.is_terminal() {
            return Err(TransitionError::NotTerminal(id.to_string()));
        }
        if self.active_row_id.as_deref() != Some(id) {
            return Err(TransitionError::NotActive(id.to_string()));
        }

        self.outcomes.insert(id.to_string(), outcome);
        self.active_row_id = None;
        Ok(())
    }

    /// Ask the run to stop after the current row. Repeated requests are
    /// accepted.
    pub fn request_stop(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            RunPhase::Running => {
                self.phase = RunPhase::StopRequested;
                Ok(())
            }
            RunPhase::StopRequested => Ok(()),
            RunPhase::Idle => Err(TransitionError::InvalidPhase(RunPhase::Idle)),
        }
    }

    /// Return to `Idle`. Returns false if already idle.
    ///
    /// A row still marked active (the loop died mid-row) is failed so that
    /// no outcome is left `Running` after the run ends.
    pub fn finish(&mut self) -> bool {
        if self.phase == RunPhase::Idle {
            return false;
        }

        let now = Utc::now();
        if let Some(active) = self.active_row_id.take() {
            self.outcomes.insert(
                active,
                RowOutcome::failed("aborted", "run ended while row was executing", now),
            );
        }

        self.phase = RunPhase::Idle;
        self.finished_at = Some(now);
        true
    }

    /// Counts of rows per status.
    pub fn progress(&self) -> RunProgress {
        let mut progress = RunProgress {
            total: self.outcomes.len(),
            ..Default::default()
        };
        for outcome in self.outcomes.values() {
            match outcome.status {
                RowStatus::Pending => progress.pending += 1,
                RowStatus::Running => progress.running += 1,
                RowStatus::Success => progress.succeeded += 1,
                RowStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }

    /// Copy of the current state.
    pub fn view(&self) -> RunStateView {
        RunStateView {
            run_id: self.run_id,
            phase: self.phase,
            active_row_id: self.active_row_id.clone(),
            row_ids: self.row_ids.clone(),
            outcomes: self.outcomes.clone(),
            progress: self.progress(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Run state shared between the engine and status readers.
///
/// Transitions serialize on a mutex and then swap in a fresh immutable
/// view; readers only clone the current `Arc`. Neither lock is held across
/// an `.await`.
#[derive(Debug)]
pub struct SharedRunState {
    state: Mutex<RunState>,
    published: RwLock<Arc<RunStateView>>,
}

impl Default for SharedRunState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRunState {
    pub fn new() -> Self {
        let state = RunState::new();
        let view = Arc::new(state.view());
        Self {
            state: Mutex::new(state),
            published: RwLock::new(view),
        }
    }

    /// Apply a transition and publish the resulting view.
    ///
    /// Nothing is published when the transition is rejected.
    pub fn transition<T, F>(&self, f: F) -> Result<T, TransitionError>
    where
        F: FnOnce(&mut RunState) -> Result<T, TransitionError>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut state)?;
        let view = Arc::new(state.view());
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = view;
        Ok(out)
    }

    /// Current phase, read from the authoritative state.
    pub fn phase(&self) -> RunPhase {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase()
    }

    /// Most recently published view.
    pub fn snapshot(&self) -> Arc<RunStateView> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
