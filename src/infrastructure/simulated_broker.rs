//! In-process simulated broker
//!
//! Implements the broker traits over in-memory accounts. Tests and the
//! simulation mode drive it by opening, modifying and closing positions, and
//! can script failures of individual lifecycle steps.

use crate::domain::entities::position::{ClosingDeal, Position};
use crate::domain::repositories::broker_client::{
    BrokerClient, BrokerError, BrokerResult, DealHistory, PositionSource, StreamingSession,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Lifecycle step whose next calls can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimStep {
    Deploy,
    WaitConnected,
    OpenSession,
    Synchronize,
    Snapshot,
    DealLookup,
}

#[derive(Default)]
struct SimAccount {
    deployed: bool,
    positions: BTreeMap<String, Position>,
    deals: HashMap<String, ClosingDeal>,
    /// Bumped whenever live sessions are invalidated
    session_generation: u64,
}

#[derive(Default)]
struct SimState {
    accounts: HashMap<String, SimAccount>,
    failures: HashMap<SimStep, Vec<BrokerError>>,
    deploy_calls: u32,
    undeploy_calls: u32,
    sessions_opened: u32,
}

impl SimState {
    fn take_failure(&mut self, step: SimStep) -> BrokerResult<()> {
        match self.failures.get_mut(&step) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct SimulatedBroker {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain data behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `times` calls of `step` fail with `error`
    pub fn fail_next(&self, step: SimStep, times: usize, error: BrokerError) {
        let mut state = self.lock();
        let queue = state.failures.entry(step).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Drop every scripted failure that has not fired yet
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn open_position(&self, account_id: &str, position: Position) {
        let mut state = self.lock();
        let account = state.accounts.entry(account_id.to_string()).or_default();
        account.positions.insert(position.id.clone(), position);
    }

    pub fn modify_position(
        &self,
        account_id: &str,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> bool {
        let mut state = self.lock();
        let Some(position) = state
            .accounts
            .get_mut(account_id)
            .and_then(|a| a.positions.get_mut(position_id))
        else {
            return false;
        };
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        true
    }

    /// Remove a position and, when `profit` is given, record its closing
    /// deal in the history
    pub fn close_position(
        &self,
        account_id: &str,
        position_id: &str,
        price: f64,
        profit: Option<f64>,
    ) -> bool {
        let mut state = self.lock();
        let Some(account) = state.accounts.get_mut(account_id) else {
            return false;
        };
        if account.positions.remove(position_id).is_none() {
            return false;
        }
        if let Some(profit) = profit {
            account.deals.insert(
                position_id.to_string(),
                ClosingDeal {
                    position_id: position_id.to_string(),
                    price,
                    profit,
                    time: Utc::now(),
                },
            );
        }
        true
    }

    /// Invalidate live sessions of the account; their next snapshot fails
    /// with `SessionLost`
    pub fn drop_sessions(&self, account_id: &str) {
        let mut state = self.lock();
        let account = state.accounts.entry(account_id.to_string()).or_default();
        account.session_generation += 1;
    }

    pub fn is_deployed(&self, account_id: &str) -> bool {
        self.lock()
            .accounts
            .get(account_id)
            .map(|a| a.deployed)
            .unwrap_or(false)
    }

    pub fn deploy_calls(&self) -> u32 {
        self.lock().deploy_calls
    }

    pub fn undeploy_calls(&self) -> u32 {
        self.lock().undeploy_calls
    }

    pub fn sessions_opened(&self) -> u32 {
        self.lock().sessions_opened
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn ensure_deployed(&self, account_id: &str) -> BrokerResult<()> {
        let mut state = self.lock();
        state.deploy_calls += 1;
        state.take_failure(SimStep::Deploy)?;
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .deployed = true;
        debug!("Simulated account {} deployed", account_id);
        Ok(())
    }

    async fn wait_connected(&self, account_id: &str) -> BrokerResult<()> {
        let mut state = self.lock();
        state.take_failure(SimStep::WaitConnected)?;
        match state.accounts.get(account_id) {
            Some(account) if account.deployed => Ok(()),
            _ => Err(BrokerError::Unavailable(format!(
                "account {} is not deployed",
                account_id
            ))),
        }
    }

    async fn open_session(&self, account_id: &str) -> BrokerResult<Box<dyn StreamingSession>> {
        let mut state = self.lock();
        state.take_failure(SimStep::OpenSession)?;
        let generation = state
            .accounts
            .get(account_id)
            .filter(|a| a.deployed)
            .map(|a| a.session_generation)
            .ok_or_else(|| BrokerError::AccountNotFound(account_id.to_string()))?;
        state.sessions_opened += 1;

        Ok(Box::new(SimulatedSession {
            broker: self.clone(),
            account_id: account_id.to_string(),
            generation,
        }))
    }

    async fn undeploy(&self, account_id: &str) -> BrokerResult<()> {
        let mut state = self.lock();
        state.undeploy_calls += 1;
        if let Some(account) = state.accounts.get_mut(account_id) {
            account.deployed = false;
            account.session_generation += 1;
        }
        Ok(())
    }
}

pub struct SimulatedSession {
    broker: SimulatedBroker,
    account_id: String,
    generation: u64,
}

impl SimulatedSession {
    fn check_alive(&self, state: &SimState) -> BrokerResult<()> {
        match state.accounts.get(&self.account_id) {
            Some(account) if account.deployed && account.session_generation == self.generation => {
                Ok(())
            }
            _ => Err(BrokerError::SessionLost(format!(
                "session of {} was closed",
                self.account_id
            ))),
        }
    }
}

#[async_trait]
impl PositionSource for SimulatedSession {
    async fn snapshot(&self) -> BrokerResult<Vec<Position>> {
        let mut state = self.broker.lock();
        state.take_failure(SimStep::Snapshot)?;
        self.check_alive(&state)?;
        Ok(state
            .accounts
            .get(&self.account_id)
            .map(|a| a.positions.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DealHistory for SimulatedSession {
    async fn closing_deal(&self, position_id: &str) -> BrokerResult<Option<ClosingDeal>> {
        let mut state = self.broker.lock();
        state.take_failure(SimStep::DealLookup)?;
        Ok(state
            .accounts
            .get(&self.account_id)
            .and_then(|a| a.deals.get(position_id).cloned()))
    }
}

#[async_trait]
impl StreamingSession for SimulatedSession {
    async fn wait_synchronized(&self) -> BrokerResult<()> {
        let mut state = self.broker.lock();
        state.take_failure(SimStep::Synchronize)?;
        self.check_alive(&state)
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}
