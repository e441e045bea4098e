//! MetaApi REST adapter
//!
//! Account lifecycle goes through the provisioning API, positions and deal
//! history through the regional client API. Every request carries the
//! provider token in the `auth-token` header.

use crate::config::BrokerConfig;
use crate::domain::entities::position::{ClosingDeal, Position};
use crate::domain::entities::trade::Direction;
use crate::domain::repositories::broker_client::{
    BrokerClient, BrokerError, BrokerResult, DealHistory, PositionSource, StreamingSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const USER_AGENT: &str = concat!("trade-copilot/", env!("CARGO_PKG_VERSION"));

/// Delay between two account state polls while waiting for the terminal
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Account as returned by the provisioning API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaApiAccount {
    pub state: String,
    #[serde(default)]
    pub connection_status: Option<String>,
}

/// Open position as returned by the client API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaApiPosition {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub position_type: String,
    pub open_price: f64,
    pub current_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub volume: f64,
    pub time: Option<DateTime<Utc>>,
    pub profit: Option<f64>,
}

impl MetaApiPosition {
    fn into_position(self) -> BrokerResult<Position> {
        let direction: Direction = self
            .position_type
            .parse()
            .map_err(BrokerError::InvalidResponse)?;
        Ok(Position {
            id: self.id,
            symbol: self.symbol,
            direction,
            open_price: self.open_price,
            current_price: self.current_price,
            // MetaApi reports an unset level as 0
            stop_loss: self.stop_loss.filter(|v| *v != 0.0),
            take_profit: self.take_profit.filter(|v| *v != 0.0),
            volume: self.volume,
            open_time: self.time,
            profit: self.profit,
        })
    }
}

/// History deal as returned by the client API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaApiDeal {
    pub position_id: Option<String>,
    pub entry_type: Option<String>,
    pub price: Option<f64>,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub swap: f64,
    pub time: DateTime<Utc>,
}

/// Latest exit deal of a position, with profit net of commission and swap
pub fn closing_deal_from(position_id: &str, deals: Vec<MetaApiDeal>) -> Option<ClosingDeal> {
    deals
        .into_iter()
        .filter(|d| d.entry_type.as_deref() == Some("DEAL_ENTRY_OUT"))
        .filter(|d| d.position_id.as_deref().map_or(true, |p| p == position_id))
        .max_by_key(|d| d.time)
        .and_then(|d| {
            Some(ClosingDeal {
                position_id: position_id.to_string(),
                price: d.price?,
                profit: d.profit + d.commission + d.swap,
                time: d.time,
            })
        })
}

struct Inner {
    client: Client,
    token: Zeroizing<String>,
    provisioning_url: String,
    client_url: String,
}

impl Inner {
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("auth-token", self.token.as_str())
            .header("User-Agent", USER_AGENT)
    }

    fn account_url(&self, account_id: &str) -> String {
        format!(
            "{}/users/current/accounts/{}",
            self.provisioning_url, account_id
        )
    }

    fn client_account_url(&self, account_id: &str) -> String {
        format!("{}/users/current/accounts/{}", self.client_url, account_id)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> BrokerResult<reqwest::Response> {
        let response = self.authed(request).send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Timeout(format!("{}: {}", what, e))
            } else {
                BrokerError::Network(format!("{}: {}", what, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!("{} returned {} - {}", what, status, body);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Authentication(detail),
            StatusCode::NOT_FOUND => BrokerError::AccountNotFound(detail),
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                BrokerError::Unavailable(detail)
            }
            _ => BrokerError::InvalidResponse(detail),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> BrokerResult<T> {
        let response = self.send(self.client.get(url), what).await?;
        response
            .json()
            .await
            .map_err(|e| BrokerError::InvalidResponse(format!("{}: {}", what, e)))
    }

    async fn account(&self, account_id: &str) -> BrokerResult<MetaApiAccount> {
        self.get_json(&self.account_url(account_id), "account state")
            .await
    }
}

/// MetaApi broker client
#[derive(Clone)]
pub struct MetaApiClient {
    inner: Arc<Inner>,
}

impl MetaApiClient {
    pub fn new(config: &BrokerConfig, token: Zeroizing<String>) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::Network(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                token,
                provisioning_url: config.provisioning_url.trim_end_matches('/').to_string(),
                client_url: config.client_base_url().trim_end_matches('/').to_string(),
            }),
        })
    }
}

#[async_trait]
impl BrokerClient for MetaApiClient {
    fn name(&self) -> &str {
        "metaapi"
    }

    async fn ensure_deployed(&self, account_id: &str) -> BrokerResult<()> {
        let account = self.inner.account(account_id).await?;
        match account.state.as_str() {
            "DEPLOYED" | "DEPLOYING" => {
                debug!("MetaApi account {} is {}", account_id, account.state);
                Ok(())
            }
            "DEPLOY_FAILED" => Err(BrokerError::DeployFailed(account_id.to_string())),
            state => {
                info!("Deploying MetaApi account {} (state {})", account_id, state);
                let url = format!("{}/deploy", self.inner.account_url(account_id));
                self.inner
                    .send(self.inner.client.post(&url), "deploy")
                    .await?;
                Ok(())
            }
        }
    }

    async fn wait_connected(&self, account_id: &str) -> BrokerResult<()> {
        loop {
            let account = self.inner.account(account_id).await?;
            if account.state == "DEPLOY_FAILED" {
                return Err(BrokerError::DeployFailed(format!(
                    "{}: check the credentials and server name",
                    account_id
                )));
            }
            if account.state == "DEPLOYED"
                && account.connection_status.as_deref() == Some("CONNECTED")
            {
                return Ok(());
            }
            debug!(
                "MetaApi account {} state={} connectionStatus={:?}",
                account_id, account.state, account.connection_status
            );
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }
    }

    async fn open_session(&self, account_id: &str) -> BrokerResult<Box<dyn StreamingSession>> {
        Ok(Box::new(MetaApiSession {
            inner: self.inner.clone(),
            account_id: account_id.to_string(),
        }))
    }

    async fn undeploy(&self, account_id: &str) -> BrokerResult<()> {
        let url = format!("{}/undeploy", self.inner.account_url(account_id));
        match self
            .inner
            .send(self.inner.client.post(&url), "undeploy")
            .await
        {
            Ok(_) | Err(BrokerError::AccountNotFound(_)) => Ok(()),
            Err(e) => {
                warn!("Failed to undeploy MetaApi account {}: {}", account_id, e);
                Err(e)
            }
        }
    }
}

/// REST-polled session on one account
pub struct MetaApiSession {
    inner: Arc<Inner>,
    account_id: String,
}

#[async_trait]
impl PositionSource for MetaApiSession {
    async fn snapshot(&self) -> BrokerResult<Vec<Position>> {
        let url = format!("{}/positions", self.inner.client_account_url(&self.account_id));
        let positions: Vec<MetaApiPosition> =
            match self.inner.get_json(&url, "positions").await {
                Err(BrokerError::AccountNotFound(detail)) => {
                    return Err(BrokerError::SessionLost(detail))
                }
                other => other?,
            };
        positions.into_iter().map(MetaApiPosition::into_position).collect()
    }
}

#[async_trait]
impl DealHistory for MetaApiSession {
    async fn closing_deal(&self, position_id: &str) -> BrokerResult<Option<ClosingDeal>> {
        let url = format!(
            "{}/history-deals/position/{}",
            self.inner.client_account_url(&self.account_id),
            position_id
        );
        let deals: Vec<MetaApiDeal> = match self.inner.get_json(&url, "history deals").await {
            Err(BrokerError::AccountNotFound(_)) => return Ok(None),
            other => other?,
        };
        Ok(closing_deal_from(position_id, deals))
    }
}

#[async_trait]
impl StreamingSession for MetaApiSession {
    async fn wait_synchronized(&self) -> BrokerResult<()> {
        let url = format!(
            "{}/account-information",
            self.inner.client_account_url(&self.account_id)
        );
        let _: serde_json::Value = self.inner.get_json(&url, "account information").await?;
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_parsing() {
        let raw = r#"{
            "id": "46214692",
            "symbol": "EURUSD",
            "type": "POSITION_TYPE_SELL",
            "openPrice": 1.0851,
            "currentPrice": 1.0843,
            "stopLoss": 1.0880,
            "takeProfit": 0,
            "volume": 0.1,
            "time": "2024-03-04T09:15:00Z",
            "profit": 8.0
        }"#;
        let position: MetaApiPosition = serde_json::from_str(raw).unwrap();
        let position = position.into_position().unwrap();
        assert_eq!(position.direction, Direction::Sell);
        assert_eq!(position.stop_loss, Some(1.088));
        assert_eq!(position.take_profit, None);
    }

    #[test]
    fn test_closing_deal_nets_commission_and_swap() {
        let raw = r#"[
            {"positionId": "p1", "entryType": "DEAL_ENTRY_IN", "price": 1.08, "profit": 0, "time": "2024-03-04T09:00:00Z"},
            {"positionId": "p1", "entryType": "DEAL_ENTRY_OUT", "price": 1.09, "profit": 50.0, "commission": -3.5, "swap": -1.25, "time": "2024-03-04T12:00:00Z"}
        ]"#;
        let deals: Vec<MetaApiDeal> = serde_json::from_str(raw).unwrap();
        let deal = closing_deal_from("p1", deals).unwrap();
        assert_eq!(deal.price, 1.09);
        assert!((deal.profit - 45.25).abs() < 1e-9);
    }

    #[test]
    fn test_no_exit_deal_means_no_close() {
        let raw = r#"[{"positionId": "p1", "entryType": "DEAL_ENTRY_IN", "price": 1.08, "time": "2024-03-04T09:00:00Z"}]"#;
        let deals: Vec<MetaApiDeal> = serde_json::from_str(raw).unwrap();
        assert!(closing_deal_from("p1", deals).is_none());
    }

    #[test]
    fn test_client_urls() {
        let config = BrokerConfig::default();
        let client = MetaApiClient::new(&config, Zeroizing::new("token".to_string())).unwrap();
        assert_eq!(
            client.inner.client_account_url("abc"),
            "https://mt-client-api-v1.new-york.agiliumtrade.ai/users/current/accounts/abc"
        );
    }
}
