//! Database Models
//!
//! Row types for trades, the trade audit log, linked accounts and trading
//! rules, plus their conversions into domain entities. JSON columns are
//! stored as TEXT.

use super::DatabaseError;
use crate::domain::entities::account_link::AccountLink;
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::behavioral_alert::BehavioralAlert;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trading_rules::TradingRules;
use crate::domain::value_objects::assessment::{Assessment, TradeReview};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub account_id: Option<String>,
    pub external_id: Option<String>,
    pub symbol: String,
    pub direction: String, // "BUY" or "SELL"
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
    pub assessment: Option<String>,       // JSON
    pub review: Option<String>,           // JSON
    pub behavioral_flags: String,         // JSON array
    pub status: String,                   // "OPEN" or "CLOSED"
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit log record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogRecord {
    pub id: i64,
    pub trade_id: String,
    pub user_id: String,
    pub event_type: String,
    pub payload: String, // JSON
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Linked account record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountLinkRecord {
    pub user_id: String,
    pub account_id: String,
    pub credentials_ref: Option<String>,
    pub platform: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Trading rules record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradingRulesRecord {
    pub user_id: String,
    pub max_risk_percent: f64,
    pub min_risk_reward: f64,
    pub max_trades_per_day: i64,
    pub blocked_sessions: String, // JSON array
    pub min_minutes_between_trades: i64,
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::DecodeError(format!("Invalid JSON in {}: {}", column, e)))
}

pub(crate) fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::DecodeError(format!("Cannot encode {}: {}", column, e)))
}

impl TryFrom<TradeRecord> for Trade {
    type Error = DatabaseError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let assessment: Option<Assessment> = record
            .assessment
            .as_deref()
            .map(|raw| decode_json("assessment", raw))
            .transpose()?;
        let review: Option<TradeReview> = record
            .review
            .as_deref()
            .map(|raw| decode_json("review", raw))
            .transpose()?;
        let behavioral_flags: Vec<BehavioralAlert> =
            decode_json("behavioral_flags", &record.behavioral_flags)?;

        Ok(Trade {
            direction: record
                .direction
                .parse()
                .map_err(DatabaseError::DecodeError)?,
            status: record.status.parse().map_err(DatabaseError::DecodeError)?,
            id: record.id,
            user_id: record.user_id,
            account_id: record.account_id,
            external_id: record.external_id,
            symbol: record.symbol,
            entry_price: record.entry_price,
            exit_price: record.exit_price,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            size: record.size,
            open_time: record.open_time,
            close_time: record.close_time,
            pnl: record.pnl,
            pnl_r: record.pnl_r,
            duration_seconds: record.duration_seconds,
            assessment,
            review,
            behavioral_flags,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl TryFrom<AuditLogRecord> for AuditLogEntry {
    type Error = DatabaseError;

    fn try_from(record: AuditLogRecord) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            event_type: record
                .event_type
                .parse()
                .map_err(DatabaseError::DecodeError)?,
            payload: decode_json("payload", &record.payload)?,
            id: record.id,
            trade_id: record.trade_id,
            user_id: record.user_id,
            note: record.note,
            created_at: record.created_at,
        })
    }
}

impl From<AccountLinkRecord> for AccountLink {
    fn from(record: AccountLinkRecord) -> Self {
        AccountLink {
            user_id: record.user_id,
            account_id: record.account_id,
            credentials_ref: record.credentials_ref,
            platform: record.platform,
            last_heartbeat: record.last_heartbeat,
            created_at: record.created_at,
        }
    }
}

impl TryFrom<TradingRulesRecord> for TradingRules {
    type Error = DatabaseError;

    fn try_from(record: TradingRulesRecord) -> Result<Self, Self::Error> {
        Ok(TradingRules {
            max_risk_percent: record.max_risk_percent,
            min_risk_reward: record.min_risk_reward,
            max_trades_per_day: u32::try_from(record.max_trades_per_day).unwrap_or(0),
            blocked_sessions: decode_json("blocked_sessions", &record.blocked_sessions)?,
            min_minutes_between_trades: u32::try_from(record.min_minutes_between_trades)
                .unwrap_or(0),
        })
    }
}
