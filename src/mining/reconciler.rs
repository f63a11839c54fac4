use tracing::{info, warn};

use super::MiningState;

/// UI-side observer of mining progress.
///
/// Callbacks run synchronously on the task that made the transition, after
/// the orchestrator released its job lock, so they may call back into it.
/// [`super::MiningOrchestrator::subscribe`] is the authoritative ordering
/// when several transitions race.
pub trait ViewReconciler: Send + Sync {
    fn on_state_change(&self, state: &MiningState);

    /// The user dismissed the outcome notice.
    fn on_acknowledge(&self);
}

/// Reconciler that only logs transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReconciler;

impl ViewReconciler for LoggingReconciler {
    fn on_state_change(&self, state: &MiningState) {
        match state {
            MiningState::Failed { message } => warn!("Mining failed: {}", message),
            other => info!("Mining state: {}", other),
        }
    }

    fn on_acknowledge(&self) {
        info!("Mining outcome acknowledged");
    }
}
