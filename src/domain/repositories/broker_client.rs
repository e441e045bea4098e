//! Broker Client Traits
//!
//! The connectivity provider is modelled as two layers:
//!
//! - [`BrokerClient`] drives the account lifecycle (deploy, wait for the
//!   terminal to connect, open a streaming session, undeploy)
//! - [`StreamingSession`] is a live session exposing a position snapshot and
//!   the historical deal lookup
//!
//! The diff engine and the reconciliation sweep only depend on the narrower
//! [`PositionSource`] and [`DealHistory`] capabilities, so a push-based
//! listener can replace polling without touching them.

use crate::domain::entities::position::{ClosingDeal, Position};
use async_trait::async_trait;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Deployment failed: {0}")]
    DeployFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The streaming session is gone and must be re-established
    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BrokerError::Authentication(_) | BrokerError::AccountNotFound(_)
        )
    }
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Current open positions
    async fn snapshot(&self) -> BrokerResult<Vec<Position>>;
}

#[async_trait]
pub trait DealHistory: Send + Sync {
    /// Closing deal of a position, `None` when history has no record of it
    async fn closing_deal(&self, position_id: &str) -> BrokerResult<Option<ClosingDeal>>;
}

#[async_trait]
pub trait StreamingSession: PositionSource + DealHistory {
    /// Wait until the terminal state is synchronized with the broker
    async fn wait_synchronized(&self) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    /// Deploy the account unless it is already deployed or deploying
    async fn ensure_deployed(&self, account_id: &str) -> BrokerResult<()>;

    /// Wait for the provider to report the terminal connected to the broker
    async fn wait_connected(&self, account_id: &str) -> BrokerResult<()>;

    async fn open_session(&self, account_id: &str) -> BrokerResult<Box<dyn StreamingSession>>;

    async fn undeploy(&self, account_id: &str) -> BrokerResult<()>;
}
