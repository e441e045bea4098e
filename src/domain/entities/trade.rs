//! Trade entity
//!
//! A `Trade` is the durable record the pipeline derives from a broker
//! position and its lifecycle events. Rows are created OPEN, move to CLOSED
//! exactly once and are never deleted by the pipeline.

use crate::domain::entities::behavioral_alert::BehavioralAlert;
use crate::domain::value_objects::assessment::{Assessment, TradeReview};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    /// Sign applied to `exit - entry` to get a favourable move
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" | "POSITION_TYPE_BUY" => Ok(Direction::Buy),
            "SELL" | "POSITION_TYPE_SELL" => Ok(Direction::Sell),
            other => Err(format!("Unknown trade direction: {}", other)),
        }
    }
}

/// Lifecycle status of a trade row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => Err(format!("Unknown trade status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    /// Linked broker account the position came from, `None` for simulated trades
    pub account_id: Option<String>,
    /// Broker position id, `None` only for legacy rows
    pub external_id: Option<String>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub size: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub pnl: Option<f64>,
    pub pnl_r: Option<f64>,
    pub duration_seconds: Option<i64>,
    pub assessment: Option<Assessment>,
    pub review: Option<TradeReview>,
    pub behavioral_flags: Vec<BehavioralAlert>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn is_winner(&self) -> bool {
        self.pnl.map(|p| p > 0.0).unwrap_or(false)
    }

    pub fn is_loser(&self) -> bool {
        self.pnl.map(|p| p < 0.0).unwrap_or(false)
    }

    /// Reward to risk ratio implied by the stop-loss and take-profit levels
    pub fn planned_risk_reward(&self) -> Option<f64> {
        let sl = self.stop_loss?;
        let tp = self.take_profit?;
        let risk = (self.entry_price - sl).abs();
        if risk == 0.0 {
            return None;
        }
        Some((tp - self.entry_price).abs() / risk)
    }
}

/// Keep only the newest OPEN row per external id.
///
/// Rows without an external id are always kept. Input order is preserved for
/// the rows that survive.
pub fn dedupe_open_trades(trades: Vec<Trade>) -> Vec<Trade> {
    let mut newest: std::collections::HashMap<String, (DateTime<Utc>, String)> =
        std::collections::HashMap::new();

    for trade in trades.iter().filter(|t| t.is_open()) {
        if let Some(ext) = &trade.external_id {
            let entry = newest
                .entry(ext.clone())
                .or_insert((trade.open_time, trade.id.clone()));
            if trade.open_time > entry.0 {
                *entry = (trade.open_time, trade.id.clone());
            }
        }
    }

    let keep: HashSet<String> = newest.into_values().map(|(_, id)| id).collect();
    trades
        .into_iter()
        .filter(|t| !t.is_open() || t.external_id.is_none() || keep.contains(&t.id))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn open_trade(id: &str, external_id: &str, symbol: &str, direction: Direction) -> Trade {
        let now = Utc::now();
        Trade {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            account_id: Some("acc-1".to_string()),
            external_id: Some(external_id.to_string()),
            symbol: symbol.to_string(),
            direction,
            entry_price: 1.085,
            exit_price: None,
            stop_loss: Some(1.082),
            take_profit: Some(1.092),
            size: 0.1,
            open_time: now,
            close_time: None,
            pnl: None,
            pnl_r: None,
            duration_seconds: None,
            assessment: None,
            review: None,
            behavioral_flags: Vec::new(),
            status: TradeStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::open_trade;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("buy".parse::<Direction>().unwrap(), Direction::Buy);
        assert_eq!("POSITION_TYPE_SELL".parse::<Direction>().unwrap(), Direction::Sell);
        assert!("hold".parse::<Direction>().is_err());
    }

    #[test]
    fn test_planned_risk_reward() {
        let trade = open_trade("t1", "p1", "EURUSD", Direction::Buy);
        let rr = trade.planned_risk_reward().unwrap();
        assert!((rr - 7.0 / 3.0).abs() < 1e-6);

        let mut no_sl = trade.clone();
        no_sl.stop_loss = None;
        assert!(no_sl.planned_risk_reward().is_none());
    }

    #[test]
    fn test_dedupe_keeps_newest_open_row() {
        let mut older = open_trade("old", "p1", "EURUSD", Direction::Buy);
        older.open_time = Utc::now() - Duration::minutes(5);
        let newer = open_trade("new", "p1", "EURUSD", Direction::Buy);
        let other = open_trade("other", "p2", "GBPUSD", Direction::Sell);
        let mut legacy = open_trade("legacy", "ignored", "USDJPY", Direction::Buy);
        legacy.external_id = None;

        let kept = dedupe_open_trades(vec![newer, older, other, legacy]);
        let ids: Vec<&str> = kept.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "other", "legacy"]);
    }
}
