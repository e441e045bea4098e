//! Trade Processor
//!
//! Sole mutator of trade rows. Every event for a given (user, external id)
//! runs under that key's lock, so duplicate deliveries from the polling
//! upstream are applied at most once. Each transition commits the trade row
//! and its audit entries in one transaction, then broadcasts, then schedules
//! scoring in the background.

use crate::application::services::broadcaster::{EventBroadcaster, ScoreTrigger, TradeEvent};
use crate::application::services::keyed_locks::KeyedLocks;
use crate::application::services::scoring_service::ScoringService;
use crate::config::ProcessorConfig;
use crate::domain::entities::audit::{AuditEventType, AuditLogEntry, NewAuditEntry};
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::entities::trade_event::{
    auto_close_price, ClosedTrade, ModifiedTrade, OpenedTrade, SimulatedOpen,
};
use crate::domain::errors::ProcessingError;
use crate::domain::repositories::economic_calendar::EconomicCalendar;
use crate::domain::services::behavioral::{
    BehaviorContext, BehavioralEngine, BEHAVIOR_LOOKBACK_DAYS, NEWS_WINDOW_MINUTES,
    SESSION_LOOKBACK_DAYS,
};
use crate::domain::services::scoring::LevelChange;
use crate::domain::value_objects::assessment::{Assessment, TradeScore};
use crate::domain::value_objects::pnl::Settlement;
use crate::persistence::repository::{AuditLogRepository, TradeRepository, TradingRulesRepository};
use crate::persistence::{DatabaseError, DbPool};
use crate::task_runner::BackgroundTasks;
use chrono::{Duration, NaiveTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_PENDING_AUTO_CLOSES: usize = 1024;

fn lock_key(user_id: &str, external_id: &str) -> String {
    format!("{}:{}", user_id, external_id)
}

fn require_external_id(external_id: &str) -> Result<&str, ProcessingError> {
    let trimmed = external_id.trim();
    if trimmed.is_empty() {
        return Err(ProcessingError::InvalidInput(
            "event has no external position id".to_string(),
        ));
    }
    Ok(trimmed)
}

fn settle(mut trade: Trade, settlement: &Settlement) -> Trade {
    trade.exit_price = Some(settlement.exit_price);
    trade.pnl = Some(settlement.pnl);
    trade.pnl_r = settlement.pnl_r;
    trade.duration_seconds = Some(settlement.duration_seconds);
    trade.close_time = Some(settlement.close_time);
    trade.status = TradeStatus::Closed;
    trade.updated_at = Utc::now();
    trade
}

#[derive(Clone)]
pub struct TradeProcessor {
    pool: DbPool,
    trades: TradeRepository,
    audit: AuditLogRepository,
    rules: TradingRulesRepository,
    engine: Arc<BehavioralEngine>,
    calendar: Arc<dyn EconomicCalendar>,
    scoring: ScoringService,
    broadcaster: Arc<EventBroadcaster>,
    locks: Arc<KeyedLocks>,
    tasks: Arc<BackgroundTasks>,
    auto_closes: Arc<BackgroundTasks>,
    config: ProcessorConfig,
}

impl TradeProcessor {
    pub fn new(
        pool: DbPool,
        scoring: ScoringService,
        calendar: Arc<dyn EconomicCalendar>,
        broadcaster: Arc<EventBroadcaster>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            trades: TradeRepository::new(pool.clone()),
            audit: AuditLogRepository::new(pool.clone()),
            rules: TradingRulesRepository::new(pool.clone()),
            pool,
            engine: Arc::new(BehavioralEngine::with_tiers(config.pnl_tiers)),
            calendar,
            scoring,
            broadcaster,
            locks: Arc::new(KeyedLocks::new()),
            tasks: Arc::new(BackgroundTasks::new(
                "trade-processor",
                config.max_background_tasks,
            )),
            auto_closes: Arc::new(BackgroundTasks::new(
                "simulated-auto-close",
                MAX_PENDING_AUTO_CLOSES,
            )),
            config,
        }
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn trades(&self) -> &TradeRepository {
        &self.trades
    }

    pub fn scorer_name(&self) -> &str {
        self.scoring.scorer_name()
    }

    /// Record a position that appeared on the broker side.
    ///
    /// An existing OPEN row for the same external id is returned unchanged.
    pub async fn process_opened(
        &self,
        user_id: &str,
        data: OpenedTrade,
    ) -> Result<Trade, ProcessingError> {
        self.open(user_id, data, false).await
    }

    /// Close every OPEN row for the external id. Returns the newest one, or
    /// `None` when nothing was open (stale or duplicate close).
    pub async fn process_closed(
        &self,
        user_id: &str,
        data: ClosedTrade,
    ) -> Result<Option<Trade>, ProcessingError> {
        self.close(user_id, data, false).await
    }

    /// Apply new stop-loss / take-profit levels. Returns `None` when there
    /// is no OPEN row or the levels did not change.
    pub async fn process_modified(
        &self,
        user_id: &str,
        data: ModifiedTrade,
    ) -> Result<Option<Trade>, ProcessingError> {
        let external_id = require_external_id(&data.external_id)?.to_string();
        let _guard = self.locks.lock(&lock_key(user_id, &external_id)).await;

        let Some(current) = self
            .trades
            .find_open_by_external(user_id, &external_id)
            .await?
            .into_iter()
            .next()
        else {
            debug!(
                "Modification for unknown position {} of user {}, ignoring",
                external_id, user_id
            );
            return Ok(None);
        };

        if current.stop_loss == data.stop_loss && current.take_profit == data.take_profit {
            debug!("Levels of trade {} unchanged, ignoring", current.id);
            return Ok(None);
        }

        let change = LevelChange {
            old_stop_loss: current.stop_loss,
            old_take_profit: current.take_profit,
            new_stop_loss: data.stop_loss,
            new_take_profit: data.take_profit,
        };
        let prior = current.assessment.clone();

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        self.trades
            .update_levels(&mut tx, &current.id, data.stop_loss, data.take_profit)
            .await?;
        self.audit
            .append(
                &mut tx,
                &NewAuditEntry::new(
                    &current.id,
                    user_id,
                    AuditEventType::Modified,
                    json!({
                        "old_stop_loss": change.old_stop_loss,
                        "old_take_profit": change.old_take_profit,
                        "new_stop_loss": change.new_stop_loss,
                        "new_take_profit": change.new_take_profit,
                    }),
                ),
            )
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        let mut updated = current;
        updated.stop_loss = data.stop_loss;
        updated.take_profit = data.take_profit;
        updated.updated_at = Utc::now();

        info!(
            "Trade {} levels changed: SL {:?} -> {:?}, TP {:?} -> {:?}",
            updated.id,
            change.old_stop_loss,
            change.new_stop_loss,
            change.old_take_profit,
            change.new_take_profit
        );

        self.broadcaster.broadcast(
            user_id,
            TradeEvent::TradeUpdated {
                trade: updated.clone(),
                previous_stop_loss: change.old_stop_loss,
                previous_take_profit: change.old_take_profit,
            },
        );

        let processor = self.clone();
        let trade = updated.clone();
        self.tasks.spawn("modification re-score", async move {
            let score = processor
                .scoring
                .modification(&trade, &change, prior.as_ref())
                .await;
            match processor.apply_revised_score(&trade, score, prior).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    "Levels of trade {} moved on before its re-score finished, discarding it",
                    trade.id
                ),
                Err(e) => error!("Failed to store re-score of trade {}: {}", trade.id, e),
            }
        });

        Ok(Some(updated))
    }

    /// Manually open a trade that has no broker position behind it
    pub async fn simulate_open(
        &self,
        user_id: &str,
        data: SimulatedOpen,
    ) -> Result<Trade, ProcessingError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let external_id = format!("SIM-{}", suffix[..8].to_uppercase());
        let opened = OpenedTrade {
            external_id,
            account_id: None,
            symbol: data.symbol,
            direction: data.direction,
            entry_price: data.entry_price,
            stop_loss: data.stop_loss,
            take_profit: data.take_profit,
            size: data.size,
            open_time: None,
        };
        let trade = self.open(user_id, opened, true).await?;

        if let Some(seconds) = data.close_after_seconds.filter(|s| *s > 0) {
            self.schedule_auto_close(user_id, &trade, std::time::Duration::from_secs(seconds));
        }
        Ok(trade)
    }

    fn schedule_auto_close(&self, user_id: &str, trade: &Trade, delay: std::time::Duration) {
        let processor = self.clone();
        let user_id = user_id.to_string();
        let trade_id = trade.id.clone();
        let exit_price = auto_close_price(
            trade.direction,
            trade.entry_price,
            trade.stop_loss,
            trade.take_profit,
            &mut rand::thread_rng(),
        );

        let scheduled = self.auto_closes.spawn("simulated auto-close", async move {
            tokio::time::sleep(delay).await;
            match processor
                .simulate_close(&user_id, &trade_id, Some(exit_price))
                .await
            {
                Ok(_) => info!("Auto-closed simulated trade {} at {}", trade_id, exit_price),
                Err(ProcessingError::AlreadyClosed(_)) => {
                    debug!("Simulated trade {} was closed before its auto-close", trade_id)
                }
                Err(e) => error!("Auto-close of simulated trade {} failed: {}", trade_id, e),
            }
        });
        if scheduled {
            info!("Simulated trade {} will auto-close in {:?}", trade.id, delay);
        }
    }

    /// Manually close one of the user's OPEN trades
    pub async fn simulate_close(
        &self,
        user_id: &str,
        trade_id: &str,
        exit_price: Option<f64>,
    ) -> Result<Trade, ProcessingError> {
        let trade = self
            .trades
            .get_for_user(user_id, trade_id)
            .await?
            .ok_or_else(|| ProcessingError::TradeNotFound(trade_id.to_string()))?;
        if !trade.is_open() {
            return Err(ProcessingError::AlreadyClosed(trade_id.to_string()));
        }
        let external_id = trade.external_id.clone().ok_or_else(|| {
            ProcessingError::InvalidInput(format!("trade {} has no external id", trade_id))
        })?;

        let close = ClosedTrade {
            external_id,
            exit_price,
            pnl: None,
            close_time: None,
        };
        self.close(user_id, close, true)
            .await?
            .ok_or_else(|| ProcessingError::AlreadyClosed(trade_id.to_string()))
    }

    /// Audit log of one of the user's trades, oldest entry first
    pub async fn trade_history(
        &self,
        user_id: &str,
        trade_id: &str,
    ) -> Result<Vec<AuditLogEntry>, ProcessingError> {
        if self.trades.get_for_user(user_id, trade_id).await?.is_none() {
            return Err(ProcessingError::TradeNotFound(trade_id.to_string()));
        }
        Ok(self.audit.list_for_trade(trade_id).await?)
    }

    /// The user's OPEN trades, one per external id
    pub async fn open_trades(&self, user_id: &str) -> Result<Vec<Trade>, ProcessingError> {
        Ok(self.trades.list_open(user_id).await?)
    }

    /// Wait up to `grace` for background scoring, then abort what is left
    /// Drop pending auto-closes, then wait up to `grace` for background
    /// scoring and abort what is left
    pub async fn shutdown(&self, grace: std::time::Duration) {
        let dropped = self.auto_closes.shutdown(std::time::Duration::ZERO).await;
        if dropped > 0 {
            info!("{} pending auto-close(s) dropped at shutdown", dropped);
        }
        let aborted = self.tasks.shutdown(grace).await;
        if aborted > 0 {
            warn!("{} scoring task(s) aborted at shutdown", aborted);
        }
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        self.config.shutdown_grace
    }

    async fn open(
        &self,
        user_id: &str,
        data: OpenedTrade,
        simulated: bool,
    ) -> Result<Trade, ProcessingError> {
        let external_id = require_external_id(&data.external_id)?.to_string();
        if !data.entry_price.is_finite() || data.entry_price <= 0.0 {
            return Err(ProcessingError::InvalidInput(format!(
                "invalid entry price {} for {}",
                data.entry_price, external_id
            )));
        }
        if !data.size.is_finite() || data.size <= 0.0 {
            return Err(ProcessingError::InvalidInput(format!(
                "invalid size {} for {}",
                data.size, external_id
            )));
        }

        let guard = self.locks.lock(&lock_key(user_id, &external_id)).await;

        if let Some(existing) = self
            .trades
            .find_open_by_external(user_id, &external_id)
            .await?
            .into_iter()
            .next()
        {
            debug!(
                "Position {} of user {} already recorded as trade {}",
                external_id, user_id, existing.id
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let mut trade = Trade {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            account_id: data.account_id,
            external_id: Some(external_id),
            symbol: data.symbol.trim().to_uppercase(),
            direction: data.direction,
            entry_price: data.entry_price,
            exit_price: None,
            stop_loss: data.stop_loss,
            take_profit: data.take_profit,
            size: data.size,
            open_time: data.open_time.unwrap_or(now),
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
        };

        let context = self.behavior_context(user_id, &trade).await?;
        trade.behavioral_flags = self.engine.evaluate(&trade, &context);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        self.trades.insert(&mut tx, &trade).await?;
        self.audit
            .append(
                &mut tx,
                &NewAuditEntry::new(
                    &trade.id,
                    user_id,
                    AuditEventType::Opened,
                    json!({
                        "external_id": trade.external_id,
                        "account_id": trade.account_id,
                        "symbol": trade.symbol,
                        "direction": trade.direction,
                        "entry_price": trade.entry_price,
                        "stop_loss": trade.stop_loss,
                        "take_profit": trade.take_profit,
                        "size": trade.size,
                        "simulated": simulated,
                    }),
                ),
            )
            .await?;
        for alert in &trade.behavioral_flags {
            let entry = NewAuditEntry::new(
                &trade.id,
                user_id,
                AuditEventType::BehavioralFlag,
                json!(alert),
            )
            .with_note(alert.message.clone());
            self.audit.append(&mut tx, &entry).await?;
        }
        tx.commit().await.map_err(DatabaseError::from)?;
        drop(guard);

        info!(
            "Opened trade {} for user {}: {} {} {} @ {} ({} alert(s))",
            trade.id,
            user_id,
            trade.direction,
            trade.size,
            trade.symbol,
            trade.entry_price,
            trade.behavioral_flags.len()
        );

        self.broadcaster.broadcast(
            user_id,
            TradeEvent::TradeOpened {
                trade: trade.clone(),
                simulated,
            },
        );
        for alert in &trade.behavioral_flags {
            self.broadcaster.broadcast(
                user_id,
                TradeEvent::BehavioralAlert {
                    trade_id: trade.id.clone(),
                    alert: alert.clone(),
                },
            );
        }

        let processor = self.clone();
        let scored = trade.clone();
        self.tasks.spawn("pre-trade score", async move {
            let score = processor.scoring.pre_trade(&scored).await;
            if let Err(e) = processor.apply_pre_trade_score(&scored, score).await {
                error!("Failed to store pre-trade score of {}: {}", scored.id, e);
            }
        });

        Ok(trade)
    }

    async fn close(
        &self,
        user_id: &str,
        data: ClosedTrade,
        simulated: bool,
    ) -> Result<Option<Trade>, ProcessingError> {
        let external_id = require_external_id(&data.external_id)?.to_string();
        let guard = self.locks.lock(&lock_key(user_id, &external_id)).await;

        let open_rows = self
            .trades
            .find_open_by_external(user_id, &external_id)
            .await?;
        if open_rows.is_empty() {
            debug!(
                "Close for position {} of user {} has no OPEN trade, dropping",
                external_id, user_id
            );
            return Ok(None);
        }
        if open_rows.len() > 1 {
            warn!(
                "Position {} of user {} has {} OPEN rows, closing all of them",
                external_id,
                user_id,
                open_rows.len()
            );
        }

        let close_time = data.close_time.unwrap_or_else(Utc::now);
        let mut closed = Vec::with_capacity(open_rows.len());

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        for row in open_rows {
            let settlement = Settlement::compute(&row, &data, close_time, &self.config.pnl_tiers);
            if !self.trades.close(&mut tx, &row.id, &settlement).await? {
                continue;
            }
            self.audit
                .append(
                    &mut tx,
                    &NewAuditEntry::new(
                        &row.id,
                        user_id,
                        AuditEventType::Closed,
                        json!({
                            "exit_price": settlement.exit_price,
                            "pnl": settlement.pnl,
                            "pnl_r": settlement.pnl_r,
                            "duration_seconds": settlement.duration_seconds,
                            "broker_pnl": data.pnl.is_some(),
                            "simulated": simulated,
                        }),
                    ),
                )
                .await?;
            closed.push(settle(row, &settlement));
        }
        tx.commit().await.map_err(DatabaseError::from)?;
        drop(guard);

        // Rows arrive newest first
        let Some(newest) = closed.into_iter().next() else {
            return Ok(None);
        };

        info!(
            "Closed trade {} for user {}: exit {:?}, P&L {:?} ({:?}R)",
            newest.id, user_id, newest.exit_price, newest.pnl, newest.pnl_r
        );

        self.broadcaster.broadcast(
            user_id,
            TradeEvent::TradeClosed {
                trade: newest.clone(),
                simulated,
            },
        );

        let processor = self.clone();
        let reviewed = newest.clone();
        self.tasks.spawn("post-trade review", async move {
            let review = processor.scoring.review(&reviewed).await;
            if let Err(e) = processor.apply_review(&reviewed, review).await {
                error!("Failed to store review of {}: {}", reviewed.id, e);
            }
        });

        Ok(Some(newest))
    }

    async fn behavior_context(
        &self,
        user_id: &str,
        trade: &Trade,
    ) -> Result<BehaviorContext, DatabaseError> {
        let now = Utc::now();
        let rules = self.rules.get_or_default(user_id).await?;
        let mut context =
            BehaviorContext::empty(rules, self.config.default_account_balance, now);

        context.recent_closed = self
            .trades
            .list_closed_since(user_id, now - Duration::days(SESSION_LOOKBACK_DAYS))
            .await?;

        // the candidate is not inserted yet, so it is added to today's count
        let day_start = trade
            .open_time
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let day_end = day_start + Duration::days(1);
        context.opened_today = self
            .trades
            .count_opened_between(user_id, day_start, day_end)
            .await?
            .saturating_add(1);
        context.opened_last_30_days = self
            .trades
            .count_opened_between(
                user_id,
                day_start - Duration::days(BEHAVIOR_LOOKBACK_DAYS),
                day_start,
            )
            .await?;

        context.open_trades = self.trades.list_open(user_id).await?;
        context.calendar_events = self
            .calendar
            .events_near(trade.open_time, Duration::minutes(NEWS_WINDOW_MINUTES))
            .await;

        Ok(context)
    }

    /// Store the pre-trade score unless a newer assessment is already there
    pub(crate) async fn apply_pre_trade_score(
        &self,
        trade: &Trade,
        score: TradeScore,
    ) -> Result<bool, DatabaseError> {
        let assessment = Assessment::standalone(score);

        let mut tx = self.pool.begin().await?;
        if !self
            .trades
            .set_assessment(&mut tx, &trade.id, &assessment, true)
            .await?
        {
            debug!(
                "Trade {} already has a newer assessment, discarding pre-trade score",
                trade.id
            );
            return Ok(false);
        }
        self.audit
            .append(
                &mut tx,
                &NewAuditEntry::new(
                    &trade.id,
                    &trade.user_id,
                    AuditEventType::ScoreUpdate,
                    json!({ "trigger": ScoreTrigger::Opened, "assessment": assessment }),
                ),
            )
            .await?;
        tx.commit().await?;

        self.broadcaster.broadcast(
            &trade.user_id,
            TradeEvent::ScoreUpdate {
                trade_id: trade.id.clone(),
                trigger: ScoreTrigger::Opened,
                assessment,
            },
        );
        Ok(true)
    }

    /// Store a re-score that wraps the assessment it replaces
    /// Store a modification re-score. It only lands while the trade still
    /// carries the levels it was computed for; returns false otherwise.
    pub(crate) async fn apply_revised_score(
        &self,
        trade: &Trade,
        score: TradeScore,
        snapshot: Option<Assessment>,
    ) -> Result<bool, DatabaseError> {
        // The pre-trade score may have landed after the snapshot was taken
        let prior = match snapshot {
            Some(prior) => Some(prior),
            None => self
                .trades
                .get(&trade.id)
                .await?
                .and_then(|stored| stored.assessment),
        };
        let assessment = match prior {
            Some(prior) => Assessment::revise(score, prior),
            None => Assessment::standalone(score),
        };

        let mut tx = self.pool.begin().await?;
        if !self
            .trades
            .set_assessment_for_levels(
                &mut tx,
                &trade.id,
                &assessment,
                trade.stop_loss,
                trade.take_profit,
            )
            .await?
        {
            return Ok(false);
        }
        self.audit
            .append(
                &mut tx,
                &NewAuditEntry::new(
                    &trade.id,
                    &trade.user_id,
                    AuditEventType::ScoreUpdate,
                    json!({ "trigger": ScoreTrigger::Modified, "assessment": assessment }),
                ),
            )
            .await?;
        tx.commit().await?;

        self.broadcaster.broadcast(
            &trade.user_id,
            TradeEvent::ScoreUpdate {
                trade_id: trade.id.clone(),
                trigger: ScoreTrigger::Modified,
                assessment,
            },
        );
        Ok(true)
    }

    async fn apply_review(
        &self,
        trade: &Trade,
        review: crate::domain::value_objects::assessment::TradeReview,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        self.trades.set_review(&mut tx, &trade.id, &review).await?;
        self.audit
            .append(
                &mut tx,
                &NewAuditEntry::new(
                    &trade.id,
                    &trade.user_id,
                    AuditEventType::ScoreUpdate,
                    json!({ "trigger": "closed", "review": review }),
                ),
            )
            .await?;
        tx.commit().await?;

        self.broadcaster.broadcast(
            &trade.user_id,
            TradeEvent::ReviewUpdate {
                trade_id: trade.id.clone(),
                review,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::entities::trade::Direction;
    use crate::domain::repositories::economic_calendar::StaticCalendar;
    use crate::domain::services::scoring::HeuristicScorer;
    use crate::persistence::init_database;
    use crate::task_runner::RetryPolicy;

    pub async fn processor() -> TradeProcessor {
        processor_with_calendar(StaticCalendar::default()).await
    }

    pub async fn processor_with_calendar(calendar: StaticCalendar) -> TradeProcessor {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let scoring = ScoringService::new(
            Arc::new(HeuristicScorer::new()),
            RetryPolicy {
                max_attempts: 1,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
                jitter: false,
            },
            std::time::Duration::from_secs(1),
        );
        TradeProcessor::new(
            pool,
            scoring,
            Arc::new(calendar),
            Arc::new(EventBroadcaster::default()),
            ProcessorConfig::default(),
        )
    }

    pub fn eurusd_buy(external_id: &str) -> OpenedTrade {
        OpenedTrade {
            external_id: external_id.to_string(),
            account_id: Some("acc-1".to_string()),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            entry_price: 1.085,
            stop_loss: Some(1.082),
            take_profit: Some(1.092),
            size: 0.1,
            open_time: None,
        }
    }

    pub fn close_at(external_id: &str, price: f64) -> ClosedTrade {
        ClosedTrade {
            external_id: external_id.to_string(),
            exit_price: Some(price),
            pnl: None,
            close_time: None,
        }
    }
}
