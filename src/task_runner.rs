//! Task Runner with Retry and Bounded Background Tasks
//!
//! Provides retry with capped exponential backoff for calls to flaky
//! collaborators, and a tracked set of detached background tasks that is
//! drained with a grace period on shutdown.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Errors that know whether another attempt is worthwhile
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Error used when an attempt exceeds its time limit
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for crate::domain::repositories::broker_client::BrokerError {
    fn is_retryable(&self) -> bool {
        crate::domain::repositories::broker_client::BrokerError::is_retryable(self)
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(format!("no answer within {:?}", after))
    }
}

impl Retryable for crate::domain::errors::ScoringError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after.as_millis() as u64)
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Add up to a quarter of the delay as random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        let mut state = BackoffState::new(self.initial_delay);
        for _ in 1..failures {
            state.record_failure(self.max_delay);
        }
        state.current_delay
    }
}

/// Internal backoff state
#[derive(Debug)]
struct BackoffState {
    consecutive_failures: u32,
    current_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_delay: initial_delay,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) {
        self.consecutive_failures += 1;
        // Exponential backoff with cap
        self.current_delay = std::cmp::min(self.current_delay * 2, max_delay);
    }
}

fn with_jitter(delay: Duration, enabled: bool) -> Duration {
    let spread = (delay.as_millis() / 4) as u64;
    if !enabled || spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. Each attempt is limited to
/// `attempt_timeout`.
///
/// Dropping the returned future cancels any pending backoff sleep.
pub async fn retry_with_backoff<T, E, F, Fut>(
    task_name: &str,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = BackoffState::new(policy.initial_delay);
    let max_attempts = policy.max_attempts.max(1);

    loop {
        let attempt = state.consecutive_failures + 1;
        let err = match timeout(attempt_timeout, op()).await {
            Ok(Ok(value)) => {
                if state.consecutive_failures > 0 {
                    info!(
                        "'{}' succeeded after {} failed attempt(s)",
                        task_name, state.consecutive_failures
                    );
                }
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(_) => E::timed_out(attempt_timeout),
        };

        if !err.is_retryable() {
            error!("'{}' failed with a permanent error: {}", task_name, err);
            return Err(err);
        }
        if attempt >= max_attempts {
            error!(
                "'{}' failed after {} attempt(s): {}",
                task_name, attempt, err
            );
            return Err(err);
        }

        let delay = with_jitter(state.current_delay, policy.jitter);
        warn!(
            "'{}' failed (attempt {}/{}): {}. Retrying in {:?}",
            task_name, attempt, max_attempts, err, delay
        );
        state.record_failure(policy.max_delay);
        sleep(delay).await;
    }
}

/// Tracked set of detached background tasks.
///
/// At most `max_concurrent` tasks run at once; further tasks wait for a slot.
/// After [`BackgroundTasks::shutdown`] new tasks are refused.
pub struct BackgroundTasks {
    name: String,
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl BackgroundTasks {
    pub fn new(name: &str, max_concurrent: usize) -> Self {
        Self {
            name: name.to_string(),
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn a task. Returns false if the set is shut down.
    pub fn spawn<F>(&self, label: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            warn!("{}: refusing '{}' after shutdown", self.name, label);
            return false;
        }

        let permits = self.permits.clone();
        let label = label.to_string();
        let Ok(mut tasks) = self.tasks.lock() else {
            error!("{}: task set poisoned, dropping '{}'", self.name, label);
            return false;
        };
        // Reap finished tasks so the set only tracks live ones
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            debug!("Background task '{}' started", label);
            task.await;
        });
        true
    }

    /// Number of tracked tasks that have not been reaped yet
    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse new tasks, wait up to `grace` for running ones, then abort
    /// the rest. Returns the number of aborted tasks.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return 0,
        };

        let pending = tasks.len();
        info!(
            "{}: waiting up to {:?} for {} background task(s)",
            self.name, grace, pending
        );

        let drained = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            info!("{}: all background tasks finished", self.name);
            return 0;
        }

        let aborted = tasks.len();
        warn!(
            "{}: aborting {} background task(s) after grace period",
            self.name, aborted
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        aborted
    }
}
