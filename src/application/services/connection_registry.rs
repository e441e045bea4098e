//! Connection Registry
//!
//! Owns one supervisor per linked (user, account) pair and answers the
//! connect, disconnect and status requests of the HTTP layer.

use crate::application::actors::connection_supervisor::{
    ConnectStatus, ConnectionSupervisor, SupervisorHandle,
};
use crate::application::services::trade_processor::TradeProcessor;
use crate::config::{ReconciliationConfig, SupervisorConfig};
use crate::domain::entities::account_link::{
    is_connected, AccountKey, AccountLink, ConnectionPhase,
};
use crate::domain::errors::ConnectionError;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::persistence::repository::AccountLinkRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Credentials reference and platform stored with a new link
#[derive(Debug, Clone, Default)]
pub struct LinkDetails {
    pub credentials_ref: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub account_id: String,
    #[serde(flatten)]
    pub status: ConnectStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub connected: bool,
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct ConnectionManager {
    broker: Arc<dyn BrokerClient>,
    processor: TradeProcessor,
    links: AccountLinkRepository,
    supervisor: SupervisorConfig,
    reconciliation: ReconciliationConfig,
    handles: Mutex<HashMap<AccountKey, SupervisorHandle>>,
}

impl ConnectionManager {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        processor: TradeProcessor,
        links: AccountLinkRepository,
        supervisor: SupervisorConfig,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        Self {
            broker,
            processor,
            links,
            supervisor,
            reconciliation,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }

    /// Link the account and bring it online.
    ///
    /// Returns `connecting` rather than an error when the broker is not
    /// reachable yet. A pair that is already streaming is left alone.
    pub async fn connect(
        &self,
        user_id: &str,
        account_id: &str,
        details: LinkDetails,
    ) -> Result<ConnectResponse, ConnectionError> {
        let key = AccountKey::new(user_id, account_id);

        let existing = self.links.get(user_id, account_id).await?;
        let link = AccountLink {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            credentials_ref: details.credentials_ref,
            platform: details.platform,
            last_heartbeat: existing.as_ref().and_then(|l| l.last_heartbeat),
            created_at: existing.map(|l| l.created_at).unwrap_or_else(Utc::now),
        };
        self.links.upsert(&link).await?;

        let ready = {
            let mut handles = self.handles.lock().await;
            if let Some(handle) = handles.get(&key) {
                if handle.is_active() {
                    let state = handle.state();
                    let status = if state.phase == ConnectionPhase::Streaming {
                        ConnectStatus::AlreadyConnected
                    } else {
                        ConnectStatus::Connecting {
                            reason: format!("connection already in progress ({})", state.phase),
                        }
                    };
                    return Ok(ConnectResponse {
                        account_id: account_id.to_string(),
                        status,
                    });
                }
            }
            if let Some(stale) = handles.remove(&key) {
                stale.stop(Duration::from_secs(1)).await;
            }

            let supervisor = ConnectionSupervisor::new(
                key.clone(),
                self.broker.clone(),
                self.processor.clone(),
                self.links.clone(),
                self.supervisor.clone(),
                self.reconciliation.clone(),
            );
            let (handle, ready) = supervisor.spawn();
            handles.insert(key.clone(), handle);
            ready
        };

        let status = ready.await.unwrap_or_else(|_| ConnectStatus::Connecting {
            reason: "supervisor stopped before connecting".to_string(),
        });
        info!("Connect {}: {:?}", key, status);

        Ok(ConnectResponse {
            account_id: account_id.to_string(),
            status,
        })
    }

    /// Stop supervision, undeploy the account and delete the link.
    /// Returns false when the account was not linked.
    pub async fn disconnect(&self, user_id: &str, account_id: &str) -> Result<bool, ConnectionError> {
        let key = AccountKey::new(user_id, account_id);

        let handle = self.handles.lock().await.remove(&key);
        if let Some(handle) = handle {
            handle.stop(self.supervisor.step_timeout).await;
        }

        match timeout(self.supervisor.step_timeout, self.broker.undeploy(account_id)).await {
            Ok(Ok(())) => info!("Undeployed {}", key),
            Ok(Err(e)) => warn!("Undeploy of {} failed: {}", key, e),
            Err(_) => warn!("Undeploy of {} timed out", key),
        }

        let deleted = self.links.delete(user_id, account_id).await?;
        info!("Disconnected {} (link deleted: {})", key, deleted);
        Ok(deleted)
    }

    pub async fn status(&self, user_id: &str, account_id: &str) -> Result<AccountStatus, ConnectionError> {
        let link = self
            .links
            .get(user_id, account_id)
            .await?
            .ok_or_else(|| ConnectionError::NotLinked(account_id.to_string()))?;

        let key = AccountKey::new(user_id, account_id);
        let state = self
            .handles
            .lock()
            .await
            .get(&key)
            .map(|h| h.state())
            .unwrap_or_default();

        let freshness = chrono::Duration::from_std(self.supervisor.heartbeat_freshness)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        Ok(AccountStatus {
            account_id: account_id.to_string(),
            connected: is_connected(link.last_heartbeat, state.phase, Utc::now(), freshness),
            phase: state.phase,
            reconnect_attempts: state.reconnect_attempts,
            last_heartbeat: link.last_heartbeat,
            last_error: state.last_error,
        })
    }

    /// Reconnect every stored link, e.g. after a restart
    pub async fn resume_all(&self) -> usize {
        let links = match self.links.list().await {
            Ok(links) => links,
            Err(e) => {
                error!("Cannot list account links to resume: {}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for link in links {
            let details = LinkDetails {
                credentials_ref: link.credentials_ref.clone(),
                platform: link.platform.clone(),
            };
            match self.connect(&link.user_id, &link.account_id, details).await {
                Ok(response) => {
                    if matches!(response.status, ConnectStatus::Streaming) {
                        resumed += 1;
                    }
                }
                Err(e) => warn!(
                    "Failed to resume {}/{}: {}",
                    link.user_id, link.account_id, e
                ),
            }
        }
        resumed
    }

    pub async fn active_count(&self) -> usize {
        self.handles
            .lock()
            .await
            .values()
            .filter(|h| h.is_active())
            .count()
    }

    /// Stop every supervisor. Links are kept so they can be resumed.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<SupervisorHandle> =
            self.handles.lock().await.drain().map(|(_, h)| h).collect();
        info!("Stopping {} supervisor(s)", handles.len());
        for handle in handles {
            handle.stop(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::trade_processor::test_support::processor;
    use crate::domain::repositories::broker_client::BrokerError;
    use crate::infrastructure::simulated_broker::{SimStep, SimulatedBroker};
    use crate::task_runner::RetryPolicy;

    fn fast_supervisor() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(10),
            step_retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            step_timeout: Duration::from_secs(1),
            ..SupervisorConfig::default()
        }
    }

    async fn manager(broker: SimulatedBroker) -> ConnectionManager {
        let processor = processor().await;
        let links = AccountLinkRepository::new(processor.trades().pool().clone());
        ConnectionManager::new(
            Arc::new(broker),
            processor,
            links,
            fast_supervisor(),
            ReconciliationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_connect_streams_and_reports_connected() {
        let broker = SimulatedBroker::new();
        let manager = manager(broker.clone()).await;

        let response = manager
            .connect("u1", "acc-1", LinkDetails::default())
            .await
            .unwrap();
        assert_eq!(response.status, ConnectStatus::Streaming);

        let again = manager
            .connect("u1", "acc-1", LinkDetails::default())
            .await
            .unwrap();
        assert_eq!(again.status, ConnectStatus::AlreadyConnected);
        assert_eq!(broker.sessions_opened(), 1);

        let status = manager.status("u1", "acc-1").await.unwrap();
        assert!(status.connected);
        assert_eq!(status.phase, ConnectionPhase::Streaming);
        assert!(status.last_heartbeat.is_some());

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_connecting() {
        let broker = SimulatedBroker::new();
        broker.fail_next(SimStep::Deploy, 5, BrokerError::Unavailable("503".to_string()));
        let manager = manager(broker).await;

        let response = manager
            .connect("u1", "acc-1", LinkDetails::default())
            .await
            .unwrap();
        assert!(matches!(response.status, ConnectStatus::Connecting { .. }));

        let status = manager.status("u1", "acc-1").await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.phase, ConnectionPhase::Connecting);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_undeploys_and_unlinks() {
        let broker = SimulatedBroker::new();
        let manager = manager(broker.clone()).await;
        manager
            .connect("u1", "acc-1", LinkDetails::default())
            .await
            .unwrap();

        assert!(manager.disconnect("u1", "acc-1").await.unwrap());
        assert!(!broker.is_deployed("acc-1"));
        assert_eq!(broker.undeploy_calls(), 1);
        assert_eq!(manager.active_count().await, 0);
        assert!(matches!(
            manager.status("u1", "acc-1").await,
            Err(ConnectionError::NotLinked(_))
        ));
    }
}
