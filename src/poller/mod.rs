//! Cancellable fixed-interval polling.
//!
//! A [`PollHandle`] owns one spawned task that runs a status check once per
//! interval until the check reports a terminal value, the handle is
//! cancelled, the attempt budget runs out, or too many consecutive transport
//! failures occur. Checks never overlap: the loop awaits each check before
//! waiting for the next tick, and ticks missed while a check was running are
//! skipped rather than replayed.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest interval a poll runs at. A zero period would make the ticker
/// panic.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    /// Consecutive check errors tolerated before the poll gives up.
    pub transport_failure_limit: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: None,
            transport_failure_limit: 1,
        }
    }
}

/// What a single check reports.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome<T> {
    Pending,
    Terminal(T),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T, E> {
    Completed(T),
    TransportFailed(E),
    Exhausted { attempts: u32 },
    Cancelled,
    /// The poll task died without producing an outcome, e.g. a panicking
    /// check.
    Aborted(String),
}

pub struct PollHandle<T, E> {
    token: CancellationToken,
    task: JoinHandle<PollOutcome<T, E>>,
}

impl<T, E> PollHandle<T, E> {
    /// Stops further ticks. Idempotent. A check already in flight is dropped
    /// and its result never reaches [`PollHandle::outcome`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn outcome(self) -> PollOutcome<T, E> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => PollOutcome::Cancelled,
            Err(e) => {
                warn!("Poll task ended abnormally: {}", e);
                PollOutcome::Aborted(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(mut config: PollerConfig) -> Self {
        if config.interval < MIN_INTERVAL {
            warn!(
                "Poll interval {:?} is too short, using {:?}",
                config.interval, MIN_INTERVAL
            );
            config.interval = MIN_INTERVAL;
        }
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn start<T, E, F, Fut>(&self, check: F) -> PollHandle<T, E>
    where
        T: Send + 'static,
        E: Debug + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CheckOutcome<T>, E>> + Send + 'static,
    {
        self.start_linked(&CancellationToken::new(), check)
    }

    /// Like [`Poller::start`], but the poll is also cancelled when `parent`
    /// is.
    pub fn start_linked<T, E, F, Fut>(
        &self,
        parent: &CancellationToken,
        check: F,
    ) -> PollHandle<T, E>
    where
        T: Send + 'static,
        E: Debug + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CheckOutcome<T>, E>> + Send + 'static,
    {
        let token = parent.child_token();
        let mut config = self.config;
        config.interval = config.interval.max(MIN_INTERVAL);
        let task = tokio::spawn(run(config, token.clone(), check));
        PollHandle { token, task }
    }
}

async fn run<T, E, F, Fut>(
    config: PollerConfig,
    token: CancellationToken,
    mut check: F,
) -> PollOutcome<T, E>
where
    E: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CheckOutcome<T>, E>>,
{
    // First check happens one interval after start, not immediately.
    let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut attempts: u32 = 0;
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            result = check() => result,
        };

        // Cancellation wins over a result that raced it.
        if token.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        match result {
            Ok(CheckOutcome::Terminal(value)) => {
                debug!("Poll finished after {} checks", attempts);
                return PollOutcome::Completed(value);
            }
            Ok(CheckOutcome::Pending) => {
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "Poll check failed ({}/{}): {:?}",
                    consecutive_failures, config.transport_failure_limit, e
                );
                if consecutive_failures >= config.transport_failure_limit {
                    return PollOutcome::TransportFailed(e);
                }
            }
        }

        if let Some(max_attempts) = config.max_attempts {
            if attempts >= max_attempts {
                warn!("Poll gave up after {} checks", attempts);
                return PollOutcome::Exhausted { attempts };
            }
        }
    }
}
