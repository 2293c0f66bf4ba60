//! Execution engine.
//!
//! - `run_state`: the run state machine and its published snapshots
//! - `publisher`: read-only status access for pollers
//! - `executor`: the background run loop

mod executor;
mod publisher;
mod run_state;

pub use executor::{EngineError, ExecutionEngine, RunStart, StopRequest};
pub use publisher::StatusPublisher;
pub use run_state::{
    RowOutcome, RowStatus, RunPhase, RunProgress, RunState, RunStateView, SharedRunState,
    StartedRun, TransitionError,
};
