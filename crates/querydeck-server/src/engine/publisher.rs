//! Read-only status access for pollers.

use std::sync::Arc;

use super::run_state::{RunStateView, SharedRunState};

/// Hands out snapshots of the run state.
///
/// Cloning is cheap. A snapshot never blocks on, and is never torn by, a
/// transition in progress.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    state: Arc<SharedRunState>,
}

impl StatusPublisher {
    pub fn new(state: Arc<SharedRunState>) -> Self {
        Self { state }
    }

    /// Point-in-time copy of the run state.
    pub fn snapshot(&self) -> Arc<RunStateView> {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_state::RunPhase;

    #[test]
    fn test_snapshot_follows_transitions() {
        let state = Arc::new(SharedRunState::new());
        let publisher = StatusPublisher::new(state.clone());
        assert_eq!(publisher.snapshot().phase, RunPhase::Idle);

        state
            .transition(|s| s.start(&["a".to_string()]))
            .unwrap();
        let snap = publisher.snapshot();
        assert_eq!(snap.phase, RunPhase::Running);
        assert_eq!(snap.row_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_snapshots_from_threads() {
        let state = Arc::new(SharedRunState::new());
        let publisher = StatusPublisher::new(state.clone());
        let ids: Vec<String> = (0..50).map(|i| format!("r{i}")).collect();
        state.transition(|s| s.start(&ids)).unwrap();

        let reader = {
            let publisher = publisher.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snap = publisher.snapshot();
                    let running = snap
                        .outcomes
                        .values()
                        .filter(|o| o.status == crate::engine::RowStatus::Running)
                        .count();
                    assert!(running <= 1);
                    assert_eq!(snap.progress.total, 50);
                    assert_eq!(running, snap.progress.running);
                }
            })
        };

        for id in &ids {
            state.transition(|s| s.begin_row(id)).unwrap();
            state
                .transition(|s| {
                    s.complete_row(
                        id,
                        crate::engine::RowOutcome::success(serde_json::json!(1), chrono::Utc::now()),
                    )
                })
                .unwrap();
        }

        reader.join().unwrap();
        assert_eq!(publisher.snapshot().progress.succeeded, 50);
    }
}
