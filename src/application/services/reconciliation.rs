//! Reconciliation Sweep
//!
//! Closes OPEN trades of one linked account whose broker position no longer
//! exists, e.g. because it closed while the supervisor was disconnected.
//! Closes go through the trade processor so they get the same locking,
//! idempotence and audit trail as live closes.

use crate::application::services::trade_processor::TradeProcessor;
use crate::domain::entities::position::{ClosingDeal, PositionSnapshot};
use crate::domain::entities::trade_event::ClosedTrade;
use crate::domain::errors::ProcessingError;
use crate::domain::repositories::broker_client::DealHistory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub user_id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    /// OPEN trades of the account that were compared against the snapshot
    pub checked: usize,
    /// Trades whose position was missing from the snapshot
    pub missing: usize,
    /// Trades actually closed by this sweep
    pub closed: Vec<String>,
    /// Closes that found no history and fell back to the entry price
    pub without_deal: usize,
}

impl ReconciliationReport {
    fn new(user_id: &str, account_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            timestamp: Utc::now(),
            checked: 0,
            missing: 0,
            closed: Vec::new(),
            without_deal: 0,
        }
    }
}

/// Closing deal of a position, `None` when history has no record of it or
/// the lookup failed or timed out
pub async fn lookup_deal<H: DealHistory + ?Sized>(
    history: &H,
    external_id: &str,
    deal_timeout: Duration,
) -> Option<ClosingDeal> {
    match timeout(deal_timeout, history.closing_deal(external_id)).await {
        Ok(Ok(deal)) => deal,
        Ok(Err(e)) => {
            warn!("Deal lookup for {} failed: {}", external_id, e);
            None
        }
        Err(_) => {
            warn!("Deal lookup for {} timed out after {:?}", external_id, deal_timeout);
            None
        }
    }
}

/// Close every OPEN trade of `account_id` that is absent from `snapshot`.
///
/// Trades of other accounts, simulated trades and rows without an external
/// id are never touched.
pub async fn sweep<H: DealHistory + ?Sized>(
    processor: &TradeProcessor,
    user_id: &str,
    account_id: &str,
    snapshot: &PositionSnapshot,
    history: &H,
    deal_timeout: Duration,
) -> Result<ReconciliationReport, ProcessingError> {
    let mut report = ReconciliationReport::new(user_id, account_id);
    let open = processor
        .trades()
        .list_open_for_account(user_id, account_id)
        .await?;

    for trade in open {
        let Some(external_id) = trade.external_id.clone() else {
            continue;
        };
        report.checked += 1;
        if snapshot.contains(&external_id) {
            continue;
        }
        report.missing += 1;

        let close = match lookup_deal(history, &external_id, deal_timeout).await {
            Some(deal) => ClosedTrade {
                external_id: external_id.clone(),
                exit_price: Some(deal.price),
                pnl: Some(deal.profit),
                close_time: Some(deal.time),
            },
            None => {
                report.without_deal += 1;
                ClosedTrade {
                    external_id: external_id.clone(),
                    ..Default::default()
                }
            }
        };

        // One failing row must not stop the rest of the sweep
        match processor.process_closed(user_id, close).await {
            Ok(Some(closed)) => report.closed.push(closed.id),
            Ok(None) => debug!("Trade {} was closed concurrently", trade.id),
            Err(e) => warn!("Reconciliation failed to close trade {}: {}", trade.id, e),
        }
    }

    if report.missing > 0 {
        info!(
            "Reconciliation of {}/{}: {} checked, {} missing, {} closed ({} without deal)",
            user_id,
            account_id,
            report.checked,
            report.missing,
            report.closed.len(),
            report.without_deal
        );
    } else {
        debug!(
            "Reconciliation of {}/{}: {} open trade(s) all present",
            user_id, account_id, report.checked
        );
    }

    Ok(report)
}
