//! Database Repository
//!
//! Data access layer for trades, the trade audit log, linked accounts and
//! trading rules.
//!
//! Writes that belong to a processor transaction take a `&mut SqliteConnection`
//! so the caller decides the transaction boundary. Reads go through the pool.
//! Timestamps are stored as RFC 3339 text in UTC, which sorts in time order,
//! so time windows are filtered in SQL.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::account_link::AccountLink;
use crate::domain::entities::audit::{AuditEventType, AuditLogEntry, NewAuditEntry};
use crate::domain::entities::trade::{dedupe_open_trades, Trade};
use crate::domain::entities::trading_rules::TradingRules;
use crate::domain::value_objects::assessment::{Assessment, TradeReview};
use crate::domain::value_objects::pnl::Settlement;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, error};

fn into_trades(records: Vec<TradeRecord>) -> Result<Vec<Trade>, DatabaseError> {
    records.into_iter().map(Trade::try_from).collect()
}

fn newest_first(trades: &mut [Trade]) {
    trades.sort_by(|a, b| {
        b.open_time
            .cmp(&a.open_time)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Trade repository
#[derive(Clone)]
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new trade row
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        trade: &Trade,
    ) -> Result<(), DatabaseError> {
        let assessment = trade
            .assessment
            .as_ref()
            .map(|a| encode_json("assessment", a))
            .transpose()?;
        let review = trade
            .review
            .as_ref()
            .map(|r| encode_json("review", r))
            .transpose()?;
        let flags = encode_json("behavioral_flags", &trade.behavioral_flags)?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, account_id, external_id, symbol, direction,
                entry_price, exit_price, stop_loss, take_profit, size,
                open_time, close_time, pnl, pnl_r, duration_seconds,
                assessment, review, behavioral_flags, status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user_id)
        .bind(&trade.account_id)
        .bind(&trade.external_id)
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.size)
        .bind(trade.open_time)
        .bind(trade.close_time)
        .bind(trade.pnl)
        .bind(trade.pnl_r)
        .bind(trade.duration_seconds)
        .bind(assessment)
        .bind(review)
        .bind(flags)
        .bind(trade.status.as_str())
        .bind(trade.created_at)
        .bind(trade.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to insert trade {}: {}", trade.id, e);
            DatabaseError::QueryError(format!("Failed to insert trade: {}", e))
        })?;

        debug!(
            "Inserted trade {} ({} {}) for user {}",
            trade.id, trade.direction, trade.symbol, trade.user_id
        );
        Ok(())
    }

    /// Get trade by ID
    pub async fn get(&self, id: &str) -> Result<Option<Trade>, DatabaseError> {
        let record = sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get trade {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to get trade: {}", e))
            })?;

        record.map(Trade::try_from).transpose()
    }

    /// Get trade by ID, only if it belongs to `user_id`
    pub async fn get_for_user(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Trade>, DatabaseError> {
        Ok(self.get(id).await?.filter(|t| t.user_id == user_id))
    }

    /// OPEN rows for a user's external position id, newest first
    pub async fn find_open_by_external(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 AND external_id = ?2 AND status = 'OPEN'",
        )
        .bind(user_id)
        .bind(external_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to find open trades for {}/{}: {}",
                user_id, external_id, e
            );
            DatabaseError::QueryError(format!("Failed to find open trades: {}", e))
        })?;

        let mut trades = into_trades(records)?;
        newest_first(&mut trades);
        Ok(trades)
    }

    /// The user's OPEN trades, newest first, one per external id
    pub async fn list_open(&self, user_id: &str) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 AND status = 'OPEN'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list open trades for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list open trades: {}", e))
        })?;

        let mut trades = into_trades(records)?;
        newest_first(&mut trades);
        Ok(dedupe_open_trades(trades))
    }

    /// OPEN trades that came from one linked account
    pub async fn list_open_for_account(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 AND account_id = ?2 AND status = 'OPEN'",
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to list open trades for {}/{}: {}",
                user_id, account_id, e
            );
            DatabaseError::QueryError(format!("Failed to list open trades: {}", e))
        })?;

        let mut trades = into_trades(records)?;
        newest_first(&mut trades);
        Ok(trades)
    }

    /// CLOSED trades whose close time is at or after `since`, newest close first
    pub async fn list_closed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades \
             WHERE user_id = ?1 AND status = 'CLOSED' AND close_time IS NOT NULL AND close_time >= ?2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list closed trades for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list closed trades: {}", e))
        })?;

        let mut trades = into_trades(records)?;
        trades.sort_by(|a, b| b.close_time.cmp(&a.close_time));
        Ok(trades)
    }

    /// Number of the user's trades opened in `[from, to)`
    pub async fn count_opened_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32, DatabaseError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM trades WHERE user_id = ?1 AND open_time >= ?2 AND open_time < ?3",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count opened trades for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to count opened trades: {}", e))
        })?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Close an OPEN trade. Returns false when the row was already closed.
    pub async fn close(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        settlement: &Settlement,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE trades
            SET status = 'CLOSED', exit_price = ?1, pnl = ?2, pnl_r = ?3,
                duration_seconds = ?4, close_time = ?5, updated_at = ?6
            WHERE id = ?7 AND status = 'OPEN'
            "#,
        )
        .bind(settlement.exit_price)
        .bind(settlement.pnl)
        .bind(settlement.pnl_r)
        .bind(settlement.duration_seconds)
        .bind(settlement.close_time)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to close trade {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to close trade: {}", e))
        })?
        .rows_affected();

        debug!("Closed trade {} ({} row(s))", id, rows_affected);
        Ok(rows_affected > 0)
    }

    /// Replace stop-loss and take-profit in place
    pub async fn update_levels(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE trades SET stop_loss = ?1, take_profit = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(stop_loss)
        .bind(take_profit)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to update levels of trade {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update trade levels: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Trade not found: {}",
                id
            )));
        }

        debug!("Updated levels of trade {}", id);
        Ok(())
    }

    /// Store an assessment. With `only_if_empty`, a row that already carries
    /// one is left untouched and false is returned.
    pub async fn set_assessment(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        assessment: &Assessment,
        only_if_empty: bool,
    ) -> Result<bool, DatabaseError> {
        let raw = encode_json("assessment", assessment)?;
        let sql = if only_if_empty {
            "UPDATE trades SET assessment = ?1, updated_at = ?2 WHERE id = ?3 AND assessment IS NULL"
        } else {
            "UPDATE trades SET assessment = ?1, updated_at = ?2 WHERE id = ?3"
        };

        let rows_affected = sqlx::query(sql)
            .bind(raw)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to store assessment of trade {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to store assessment: {}", e))
            })?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Store a re-score computed for the given protective levels. Returns
    /// false when the levels have changed since, leaving the newer result.
    pub async fn set_assessment_for_levels(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        assessment: &Assessment,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let raw = encode_json("assessment", assessment)?;
        let rows_affected = sqlx::query(
            "UPDATE trades SET assessment = ?1, updated_at = ?2 \
             WHERE id = ?3 AND stop_loss IS ?4 AND take_profit IS ?5",
        )
        .bind(raw)
        .bind(Utc::now())
        .bind(id)
        .bind(stop_loss)
        .bind(take_profit)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to store re-score of trade {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to store assessment: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Store the post-trade review
    pub async fn set_review(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        review: &TradeReview,
    ) -> Result<(), DatabaseError> {
        let raw = encode_json("review", review)?;
        sqlx::query("UPDATE trades SET review = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(raw)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to store review of trade {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to store review: {}", e))
            })?;

        Ok(())
    }

    /// Pool accessor for callers that open their own transaction
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Append-only trade audit log
#[derive(Clone)]
pub struct AuditLogRepository {
    pool: DbPool,
}

impl AuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one audit row and return its id
    pub async fn append(
        &self,
        conn: &mut SqliteConnection,
        entry: &NewAuditEntry,
    ) -> Result<i64, DatabaseError> {
        let payload = encode_json("payload", &entry.payload)?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO trade_logs (trade_id, user_id, event_type, payload, note, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(&entry.trade_id)
        .bind(&entry.user_id)
        .bind(entry.event_type.as_str())
        .bind(payload)
        .bind(&entry.note)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!(
                "Failed to append {} audit entry for trade {}: {}",
                entry.event_type, entry.trade_id, e
            );
            DatabaseError::QueryError(format!("Failed to append audit entry: {}", e))
        })?;

        debug!(
            "Audit {} #{} for trade {}",
            entry.event_type, id, entry.trade_id
        );
        Ok(id)
    }

    /// Every audit row of a trade in insertion order
    pub async fn list_for_trade(&self, trade_id: &str) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let records = sqlx::query_as::<_, AuditLogRecord>(
            "SELECT * FROM trade_logs WHERE trade_id = ?1 ORDER BY id ASC",
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list audit log of trade {}: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to list audit log: {}", e))
        })?;

        records.into_iter().map(AuditLogEntry::try_from).collect()
    }

    pub async fn count_for_trade(
        &self,
        trade_id: &str,
        event_type: AuditEventType,
    ) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM trade_logs WHERE trade_id = ?1 AND event_type = ?2",
        )
        .bind(trade_id)
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count audit rows of trade {}: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to count audit rows: {}", e))
        })?;

        Ok(count)
    }
}

/// Linked broker accounts
#[derive(Clone)]
pub struct AccountLinkRepository {
    pool: DbPool,
}

impl AccountLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create or refresh the link for (user, account)
    pub async fn upsert(&self, link: &AccountLink) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO account_links (user_id, account_id, credentials_ref, platform, last_heartbeat, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, account_id) DO UPDATE SET
                credentials_ref = COALESCE(excluded.credentials_ref, account_links.credentials_ref),
                platform = COALESCE(excluded.platform, account_links.platform)
            "#,
        )
        .bind(&link.user_id)
        .bind(&link.account_id)
        .bind(&link.credentials_ref)
        .bind(&link.platform)
        .bind(link.last_heartbeat)
        .bind(link.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to store account link {}/{}: {}",
                link.user_id, link.account_id, e
            );
            DatabaseError::QueryError(format!("Failed to store account link: {}", e))
        })?;

        debug!("Stored account link {}/{}", link.user_id, link.account_id);
        Ok(())
    }

    pub async fn get(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Option<AccountLink>, DatabaseError> {
        let record = sqlx::query_as::<_, AccountLinkRecord>(
            "SELECT * FROM account_links WHERE user_id = ?1 AND account_id = ?2",
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get account link {}/{}: {}", user_id, account_id, e);
            DatabaseError::QueryError(format!("Failed to get account link: {}", e))
        })?;

        Ok(record.map(AccountLink::from))
    }

    /// Record a heartbeat. Returns false when the link no longer exists.
    pub async fn touch_heartbeat(
        &self,
        user_id: &str,
        account_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE account_links SET last_heartbeat = ?1 WHERE user_id = ?2 AND account_id = ?3",
        )
        .bind(at)
        .bind(user_id)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record heartbeat {}/{}: {}", user_id, account_id, e);
            DatabaseError::QueryError(format!("Failed to record heartbeat: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    pub async fn delete(&self, user_id: &str, account_id: &str) -> Result<bool, DatabaseError> {
        let rows_affected =
            sqlx::query("DELETE FROM account_links WHERE user_id = ?1 AND account_id = ?2")
                .bind(user_id)
                .bind(account_id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to delete account link {}/{}: {}", user_id, account_id, e);
                    DatabaseError::QueryError(format!("Failed to delete account link: {}", e))
                })?
                .rows_affected();

        Ok(rows_affected > 0)
    }

    pub async fn list(&self) -> Result<Vec<AccountLink>, DatabaseError> {
        let records = sqlx::query_as::<_, AccountLinkRecord>("SELECT * FROM account_links")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list account links: {}", e);
                DatabaseError::QueryError(format!("Failed to list account links: {}", e))
            })?;

        Ok(records.into_iter().map(AccountLink::from).collect())
    }
}

/// Per-user trading rules, written by the account service
#[derive(Clone)]
pub struct TradingRulesRepository {
    pool: DbPool,
}

impl TradingRulesRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The user's rules, or the defaults when none are stored
    pub async fn get_or_default(&self, user_id: &str) -> Result<TradingRules, DatabaseError> {
        let record = sqlx::query_as::<_, TradingRulesRecord>(
            r#"
            SELECT user_id, max_risk_percent, min_risk_reward, max_trades_per_day,
                   blocked_sessions, min_minutes_between_trades
            FROM trading_rules WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load trading rules for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to load trading rules: {}", e))
        })?;

        match record {
            Some(record) => TradingRules::try_from(record),
            None => Ok(TradingRules::default()),
        }
    }

    pub async fn upsert(&self, user_id: &str, rules: &TradingRules) -> Result<(), DatabaseError> {
        let blocked = encode_json("blocked_sessions", &rules.blocked_sessions)?;
        sqlx::query(
            r#"
            INSERT INTO trading_rules (
                user_id, max_risk_percent, min_risk_reward, max_trades_per_day,
                blocked_sessions, min_minutes_between_trades, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                max_risk_percent = excluded.max_risk_percent,
                min_risk_reward = excluded.min_risk_reward,
                max_trades_per_day = excluded.max_trades_per_day,
                blocked_sessions = excluded.blocked_sessions,
                min_minutes_between_trades = excluded.min_minutes_between_trades,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(rules.max_risk_percent)
        .bind(rules.min_risk_reward)
        .bind(i64::from(rules.max_trades_per_day))
        .bind(blocked)
        .bind(i64::from(rules.min_minutes_between_trades))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store trading rules for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to store trading rules: {}", e))
        })?;

        Ok(())
    }
}
