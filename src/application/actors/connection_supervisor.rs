//! Connection Supervisor
//!
//! One long-lived task per linked (user, account) pair. It brings the
//! account online in four retried steps, then polls the position snapshot,
//! diffs it against the previous one and feeds the differences to the trade
//! processor.
//!
//! Phases: `disconnected -> connecting -> streaming -> degraded -> connecting`.
//! A failure of the very first connection leaves the supervisor in
//! `connecting` and ends the task; an explicit reconnect starts a new one.
//! Later failures reconnect internally until the attempt budget is spent.

use crate::application::services::reconciliation::{lookup_deal, sweep};
use crate::application::services::trade_processor::TradeProcessor;
use crate::config::{ReconciliationConfig, SupervisorConfig};
use crate::domain::entities::account_link::{AccountKey, ConnectionPhase, ConnectionState};
use crate::domain::entities::position::PositionSnapshot;
use crate::domain::entities::trade_event::{ClosedTrade, ModifiedTrade, OpenedTrade};
use crate::domain::repositories::broker_client::{BrokerClient, BrokerError, StreamingSession};
use crate::domain::services::position_diff::diff_positions;
use crate::persistence::repository::AccountLinkRepository;
use crate::task_runner::retry_with_backoff;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of the first connection attempt, as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectStatus {
    Streaming,
    AlreadyConnected,
    /// Not streaming yet. Carries the reason the last step gave up.
    Connecting { reason: String },
}

/// Handle kept by the registry for a running supervisor
pub struct SupervisorHandle {
    key: AccountKey,
    state: watch::Receiver<ConnectionState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Whether the supervisor task has ended on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// True while the task is alive and either streaming or working on it
    pub fn is_active(&self) -> bool {
        !self.is_finished() && self.state.borrow().phase != ConnectionPhase::Disconnected
    }

    /// Signal the task to stop and wait up to `grace` for it to close its
    /// session. Cancels any pending backoff sleep.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.stop.send(true);
        if timeout(grace, &mut self.task).await.is_err() {
            warn!("Supervisor {} did not stop within {:?}, aborting", self.key, grace);
            self.task.abort();
        }
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// How the polling loop ended
enum PollExit {
    Failed(BrokerError),
    Stopped,
}

pub struct ConnectionSupervisor {
    key: AccountKey,
    broker: Arc<dyn BrokerClient>,
    processor: TradeProcessor,
    links: AccountLinkRepository,
    config: SupervisorConfig,
    reconciliation: ReconciliationConfig,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    pub fn new(
        key: AccountKey,
        broker: Arc<dyn BrokerClient>,
        processor: TradeProcessor,
        links: AccountLinkRepository,
        config: SupervisorConfig,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            key,
            broker,
            processor,
            links,
            config,
            reconciliation,
            state,
        }
    }

    /// Spawn the supervisor task. The receiver resolves once the first
    /// connection attempt has either reached `streaming` or given up.
    pub fn spawn(self) -> (SupervisorHandle, oneshot::Receiver<ConnectStatus>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let key = self.key.clone();
        let state = self.state.subscribe();

        let task = tokio::spawn(self.run(stop_rx, ready_tx));

        (
            SupervisorHandle {
                key,
                state,
                stop: stop_tx,
                task,
            },
            ready_rx,
        )
    }

    fn publish(&self, phase: ConnectionPhase, last_error: Option<String>) {
        self.state.send_modify(|state| {
            if state.phase != phase {
                debug!("Supervisor {}: {} -> {}", self.key, state.phase, phase);
            }
            state.phase = phase;
            if last_error.is_some() || phase == ConnectionPhase::Streaming {
                state.last_error = last_error;
            }
        });
    }

    fn set_attempts(&self, attempts: u32) {
        self.state
            .send_modify(|state| state.reconnect_attempts = attempts);
    }

    async fn run(self, mut stop: watch::Receiver<bool>, ready: oneshot::Sender<ConnectStatus>) {
        let mut ready = Some(ready);
        let mut attempts: u32 = 0;

        loop {
            self.publish(ConnectionPhase::Connecting, None);
            let established = tokio::select! {
                _ = stop_requested(&mut stop) => break,
                result = self.establish() => result,
            };

            let session = match established {
                Ok(session) => session,
                Err(e) => {
                    if let Some(ready) = ready.take() {
                        warn!("Account {} is not reachable yet: {}", self.key, e);
                        self.publish(ConnectionPhase::Connecting, Some(e.to_string()));
                        let _ = ready.send(ConnectStatus::Connecting {
                            reason: e.to_string(),
                        });
                        return;
                    }
                    self.publish(ConnectionPhase::Degraded, Some(e.to_string()));
                    if !self.backoff(&mut attempts, &mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            attempts = 0;
            self.set_attempts(0);
            self.publish(ConnectionPhase::Streaming, None);
            info!("Account {} is streaming", self.key);
            if let Some(ready) = ready.take() {
                let _ = ready.send(ConnectStatus::Streaming);
            }

            let exit = tokio::select! {
                _ = stop_requested(&mut stop) => PollExit::Stopped,
                failure = self.poll(session.as_ref()) => PollExit::Failed(failure),
            };
            self.close_session(session.as_ref()).await;

            match exit {
                PollExit::Stopped => break,
                PollExit::Failed(e) => {
                    error!("Polling of {} failed: {}", self.key, e);
                    self.publish(ConnectionPhase::Degraded, Some(e.to_string()));
                    if !self.backoff(&mut attempts, &mut stop).await {
                        break;
                    }
                }
            }
        }

        self.publish(ConnectionPhase::Disconnected, None);
        info!("Supervisor {} stopped", self.key);
    }

    /// Count a reconnection attempt and sleep before it. Returns false when
    /// the budget is spent or a stop was requested.
    async fn backoff(&self, attempts: &mut u32, stop: &mut watch::Receiver<bool>) -> bool {
        *attempts += 1;
        self.set_attempts(*attempts);
        if *attempts > self.config.max_reconnect_attempts {
            error!(
                "Account {} unreachable after {} reconnection attempts, giving up until reconnected",
                self.key,
                *attempts - 1
            );
            return false;
        }

        let delay = self.config.step_retry.delay_for(*attempts);
        warn!(
            "Reconnecting {} (attempt {}/{}) in {:?}",
            self.key, attempts, self.config.max_reconnect_attempts, delay
        );
        tokio::select! {
            _ = stop_requested(stop) => false,
            _ = sleep(delay) => true,
        }
    }

    /// Deploy, wait for the terminal, open a session and wait for it to
    /// synchronize. Each step is retried on its own.
    async fn establish(&self) -> Result<Box<dyn StreamingSession>, BrokerError> {
        let account_id = self.key.account_id.as_str();
        let policy = &self.config.step_retry;
        let step_timeout = self.config.step_timeout;

        retry_with_backoff(&format!("deploy {}", self.key), policy, step_timeout, || {
            self.broker.ensure_deployed(account_id)
        })
        .await?;

        retry_with_backoff(
            &format!("wait connected {}", self.key),
            policy,
            step_timeout,
            || self.broker.wait_connected(account_id),
        )
        .await?;

        let session = retry_with_backoff(
            &format!("open session {}", self.key),
            policy,
            step_timeout,
            || self.broker.open_session(account_id),
        )
        .await?;

        let synchronized = retry_with_backoff(
            &format!("synchronize {}", self.key),
            policy,
            step_timeout,
            || session.wait_synchronized(),
        )
        .await;
        if let Err(e) = synchronized {
            self.close_session(session.as_ref()).await;
            return Err(e);
        }

        self.heartbeat().await;
        Ok(session)
    }

    async fn close_session(&self, session: &dyn StreamingSession) {
        match timeout(self.config.step_timeout, session.close()).await {
            Ok(Ok(())) => debug!("Closed session of {}", self.key),
            Ok(Err(e)) => warn!("Failed to close session of {}: {}", self.key, e),
            Err(_) => warn!("Closing session of {} timed out", self.key),
        }
    }

    async fn heartbeat(&self) {
        match self
            .links
            .touch_heartbeat(&self.key.user_id, &self.key.account_id, Utc::now())
            .await
        {
            Ok(true) => debug!("Heartbeat recorded for {}", self.key),
            Ok(false) => warn!("Heartbeat for {} found no account link", self.key),
            Err(e) => warn!("Failed to record heartbeat for {}: {}", self.key, e),
        }
    }

    /// Poll until the session fails. Only returns on failure.
    async fn poll(&self, session: &dyn StreamingSession) -> BrokerError {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut previous = PositionSnapshot::new();
        let mut cycle: u64 = 0;
        let mut failures: u32 = 0;
        let mut reconciled = false;

        loop {
            ticker.tick().await;
            cycle += 1;

            let positions = match timeout(self.config.step_timeout, session.snapshot()).await {
                Ok(Ok(positions)) => positions,
                Ok(Err(BrokerError::SessionLost(reason))) => {
                    return BrokerError::SessionLost(reason);
                }
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        "Snapshot of {} failed ({}/{}): {}",
                        self.key, failures, self.config.max_snapshot_failures, e
                    );
                    if failures >= self.config.max_snapshot_failures {
                        return e;
                    }
                    continue;
                }
                Err(_) => {
                    failures += 1;
                    let e = BrokerError::Timeout(format!(
                        "snapshot of {} took longer than {:?}",
                        self.key, self.config.step_timeout
                    ));
                    warn!(
                        "{} ({}/{})",
                        e, failures, self.config.max_snapshot_failures
                    );
                    if failures >= self.config.max_snapshot_failures {
                        return e;
                    }
                    continue;
                }
            };
            failures = 0;

            let current: PositionSnapshot = positions.into_iter().collect();
            let due_sweep = self.reconciliation.enabled
                && (!reconciled || cycle % self.reconciliation.every_cycles.max(1) == 0);
            let sweep_snapshot = due_sweep.then(|| current.clone());

            previous = self.apply_diff(session, previous, current).await;

            if let Some(snapshot) = sweep_snapshot {
                reconciled = true;
                if let Err(e) = sweep(
                    &self.processor,
                    &self.key.user_id,
                    &self.key.account_id,
                    &snapshot,
                    session,
                    self.reconciliation.deal_lookup_timeout,
                )
                .await
                {
                    warn!("Reconciliation of {} failed: {}", self.key, e);
                }
            }

            if cycle % self.config.heartbeat_every_cycles.max(1) == 0 {
                self.heartbeat().await;
            }
        }
    }

    /// Hand one pass of differences to the processor: opens, then closes,
    /// then modifications. Returns the snapshot to remember. Events that
    /// failed for a transient reason are left out of it so the next pass
    /// detects them again.
    async fn apply_diff(
        &self,
        session: &dyn StreamingSession,
        previous: PositionSnapshot,
        current: PositionSnapshot,
    ) -> PositionSnapshot {
        let diff = diff_positions(&previous, &current);
        if diff.is_empty() {
            return current;
        }
        debug!(
            "{}: {} opened, {} closed, {} modified",
            self.key,
            diff.opened.len(),
            diff.closed.len(),
            diff.modified.len()
        );

        let user_id = self.key.user_id.as_str();
        let mut remembered = current;

        for position in &diff.opened {
            let event = OpenedTrade::from_position(&self.key.account_id, position);
            if let Err(e) = self.processor.process_opened(user_id, event).await {
                warn!("Failed to record open of {}: {}", position.id, e);
                if !e.is_client_error() {
                    remembered.remove(&position.id);
                }
            }
        }

        for position in &diff.closed {
            let deal = lookup_deal(
                session,
                &position.id,
                self.reconciliation.deal_lookup_timeout,
            )
            .await;
            let event = ClosedTrade::resolve(position, deal.as_ref());
            if let Err(e) = self.processor.process_closed(user_id, event).await {
                warn!("Failed to record close of {}: {}", position.id, e);
                if !e.is_client_error() {
                    remembered.insert(position.clone());
                }
            }
        }

        for position in &diff.modified {
            let event = ModifiedTrade::from(position);
            if let Err(e) = self.processor.process_modified(user_id, event).await {
                warn!("Failed to record modification of {}: {}", position.id, e);
                if let Some(old) = previous.get(&position.id).filter(|_| !e.is_client_error()) {
                    remembered.insert(old.clone());
                }
            }
        }

        remembered
    }
}
