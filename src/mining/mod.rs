//! Mining job orchestration.
//!
//! `Idle -> Starting -> Polling -> {Succeeded, Failed} -> Idle`. The
//! orchestrator owns at most one job at a time; the way back to `Idle` is an
//! explicit [`MiningOrchestrator::acknowledge`], which also invalidates and
//! refetches the cached blockchain.

mod reconciler;


use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{EntityCache, BLOCKCHAIN_KEY, TRANSACTIONS_KEY};
use crate::config::MiningSettings;
use crate::error::NodeApiError;
use crate::metrics;
use crate::node_api::{Blockchain, MiningJob, MiningJobId, MiningStatus, RemoteDataClient};
use crate::poller::{CheckOutcome, PollOutcome, Poller};
pub use reconciler::{LoggingReconciler, ViewReconciler};

pub const START_FAILED_MESSAGE: &str = "could not start mining";
pub const ALREADY_MINING_MESSAGE: &str = "mining already in progress";
pub const POLLING_ABORTED_MESSAGE: &str = "mining status checks stopped unexpectedly";
const DEFAULT_SUCCESS_MESSAGE: &str = "block mined";
const DEFAULT_FAILURE_MESSAGE: &str = "mining failed";

#[derive(Debug, Clone, PartialEq)]
pub enum MiningState {
    Idle,
    Starting,
    Polling { job_id: MiningJobId },
    Succeeded { message: String },
    Failed { message: String },
}

impl MiningState {
    pub fn is_busy(&self) -> bool {
        matches!(self, MiningState::Starting | MiningState::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MiningState::Succeeded { .. } | MiningState::Failed { .. })
    }

    /// Outcome notice text for terminal states.
    pub fn message(&self) -> Option<&str> {
        match self {
            MiningState::Succeeded { message } | MiningState::Failed { message } => {
                Some(message)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MiningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiningState::Idle => write!(f, "idle"),
            MiningState::Starting => write!(f, "starting"),
            MiningState::Polling { job_id } => write!(f, "polling job {}", job_id),
            MiningState::Succeeded { message } => write!(f, "succeeded: {}", message),
            MiningState::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Tracks the job a `start` call began (or joined).
#[derive(Debug, Clone)]
pub struct MiningHandle {
    state: watch::Receiver<MiningState>,
    token: CancellationToken,
}

impl MiningHandle {
    pub fn state(&self) -> MiningState {
        self.state.borrow().clone()
    }

    /// True once the orchestrator stopped tracking this job, either because
    /// it was torn down or because the outcome was acknowledged.
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for `Succeeded` or `Failed`. Returns `None` if tracking stopped
    /// before a terminal state was seen.
    pub async fn wait_terminal(&mut self) -> Option<MiningState> {
        loop {
            {
                let state = self.state.borrow_and_update();
                if state.is_terminal() {
                    return Some(state.clone());
                }
                if *state == MiningState::Idle {
                    return None;
                }
            }
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

struct ActiveJob {
    run_id: u64,
    token: CancellationToken,
    handle: MiningHandle,
}

struct Inner {
    client: Arc<dyn RemoteDataClient>,
    cache: Arc<EntityCache>,
    reconciler: Arc<dyn ViewReconciler>,
    poller: Poller,
    state: watch::Sender<MiningState>,
    active: Mutex<Option<ActiveJob>>,
    next_run_id: AtomicU64,
    root: CancellationToken,
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller must hold the `active` lock, and call [`Inner::notify`] with
    /// the same state once the lock is released.
    fn publish(&self, state: &MiningState) {
        info!("Mining state -> {}", state);
        self.state.send_replace(state.clone());
    }

    fn notify(&self, state: &MiningState) {
        self.reconciler.on_state_change(state);
    }

    /// Applies `state` only if `run_id` is still the tracked job and it was
    /// not cancelled.
    fn transition_if_current(&self, run_id: u64, state: MiningState) -> bool {
        {
            let active = self.lock_active();
            match active.as_ref() {
                Some(job) if job.run_id == run_id && !job.token.is_cancelled() => {
                    self.publish(&state);
                }
                _ => {
                    debug!("Discarding transition to '{}' for an untracked job", state);
                    return false;
                }
            }
        }
        self.notify(&state);
        true
    }
}

pub struct MiningOrchestrator {
    inner: Arc<Inner>,
}

impl MiningOrchestrator {
    pub fn new(
        client: Arc<dyn RemoteDataClient>,
        cache: Arc<EntityCache>,
        reconciler: Arc<dyn ViewReconciler>,
        settings: &MiningSettings,
    ) -> Self {
        let (state, _) = watch::channel(MiningState::Idle);
        Self {
            inner: Arc::new(Inner {
                client,
                cache,
                reconciler,
                poller: Poller::new(settings.poller_config()),
                state,
                active: Mutex::new(None),
                next_run_id: AtomicU64::new(1),
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> MiningState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MiningState> {
        self.inner.state.subscribe()
    }

    /// Starts a mining job. While a job is tracked (including an
    /// unacknowledged outcome) this does nothing and returns that job's
    /// handle.
    pub fn start(&self) -> MiningHandle {
        let mut active = self.inner.lock_active();
        if let Some(job) = active.as_ref() {
            debug!("Mining job already tracked, ignoring start");
            return job.handle.clone();
        }

        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.root.child_token();
        self.inner.publish(&MiningState::Starting);

        let handle = MiningHandle {
            state: self.inner.state.subscribe(),
            token: token.clone(),
        };
        *active = Some(ActiveJob {
            run_id,
            token: token.clone(),
            handle: handle.clone(),
        });
        drop(active);

        self.inner.notify(&MiningState::Starting);
        tokio::spawn(run_job(Arc::clone(&self.inner), run_id, token));
        handle
    }

    /// Dismisses a `Succeeded`/`Failed` outcome: back to `Idle`, then the
    /// blockchain and pool entries are invalidated and the blockchain is
    /// refetched once. Returns `Ok(None)` when there is nothing to
    /// acknowledge.
    pub async fn acknowledge(&self) -> Result<Option<Blockchain>, NodeApiError> {
        {
            let mut active = self.inner.lock_active();
            let terminal = self.inner.state.borrow().is_terminal();
            if !terminal {
                debug!("No mining outcome to acknowledge");
                return Ok(None);
            }
            if let Some(job) = active.take() {
                job.token.cancel();
            }
            self.inner.publish(&MiningState::Idle);
        }

        self.inner.notify(&MiningState::Idle);
        self.inner.reconciler.on_acknowledge();
        self.inner.cache.invalidate(BLOCKCHAIN_KEY);
        self.inner.cache.invalidate(TRANSACTIONS_KEY);

        let chain = self.inner.cache.blockchain(&self.inner.client).await?;
        info!("Blockchain refreshed after mining, {} blocks", chain.height());
        Ok(Some(chain))
    }

    /// Tears the orchestrator down. Any tracked job is forgotten; the node
    /// keeps running it but this client never asks about it again.
    pub fn shutdown(self) {}
}

impl Drop for MiningOrchestrator {
    fn drop(&mut self) {
        let mut active = self.inner.lock_active();
        if let Some(job) = active.take() {
            info!("Abandoning tracked mining job");
            job.token.cancel();
        }
        self.inner.root.cancel();
    }
}

async fn run_job(inner: Arc<Inner>, run_id: u64, token: CancellationToken) {
    let started = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = AssertUnwindSafe(inner.client.start_mining_job()).catch_unwind() => result,
    };

    let job_id = match started {
        Ok(Ok(job_id)) => {
            metrics::record_mining_job_started();
            job_id
        }
        Err(_) => {
            error!("Mining start request panicked");
            let failed = MiningState::Failed {
                message: START_FAILED_MESSAGE.to_string(),
            };
            inner.transition_if_current(run_id, failed);
            return;
        }
        Ok(Err(e)) => {
            error!("Could not start mining job: {}", e);
            let message = match e {
                NodeApiError::MiningAlreadyInProgress => ALREADY_MINING_MESSAGE,
                _ => START_FAILED_MESSAGE,
            };
            let failed = MiningState::Failed {
                message: message.to_string(),
            };
            inner.transition_if_current(run_id, failed);
            return;
        }
    };

    let polling = MiningState::Polling {
        job_id: job_id.clone(),
    };
    if !inner.transition_if_current(run_id, polling) {
        return;
    }

    let client = Arc::clone(&inner.client);
    let poll_id = job_id.clone();
    let poll = inner.poller.start_linked(&token, move || {
        let client = Arc::clone(&client);
        let id = poll_id.clone();
        async move {
            metrics::record_mining_status_poll();
            let job = client.get_mining_job_status(&id).await?;
            debug!("Mining job {} is {:?}", id, job.status);
            Ok::<_, NodeApiError>(if job.status.is_terminal() {
                CheckOutcome::Terminal(job)
            } else {
                CheckOutcome::Pending
            })
        }
    });

    let next = match poll.outcome().await {
        PollOutcome::Completed(job) => terminal_state(job),
        PollOutcome::TransportFailed(e) => {
            warn!("Lost contact with node while polling job {}: {}", job_id, e);
            MiningState::Failed {
                message: format!("lost contact with node while mining: {}", e),
            }
        }
        PollOutcome::Exhausted { attempts } => MiningState::Failed {
            message: format!("mining did not finish after {} status checks", attempts),
        },
        PollOutcome::Aborted(reason) => {
            error!("Status polling for job {} stopped: {}", job_id, reason);
            MiningState::Failed {
                message: POLLING_ABORTED_MESSAGE.to_string(),
            }
        }
        PollOutcome::Cancelled => {
            debug!("Stopped polling mining job {}", job_id);
            return;
        }
    };

    let succeeded = matches!(next, MiningState::Succeeded { .. });
    if inner.transition_if_current(run_id, next) {
        metrics::record_mining_job_finished(succeeded);
    }
}

fn terminal_state(job: MiningJob) -> MiningState {
    let details = job.details.trim();
    match job.status {
        MiningStatus::Successful => MiningState::Succeeded {
            message: non_empty_or(details, DEFAULT_SUCCESS_MESSAGE),
        },
        _ => MiningState::Failed {
            message: non_empty_or(details, DEFAULT_FAILURE_MESSAGE),
        },
    }
}

fn non_empty_or(details: &str, fallback: &str) -> String {
    if details.is_empty() {
        fallback.to_string()
    } else {
        details.to_string()
    }
}
