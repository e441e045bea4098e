//! Behavioral Rule Engine
//!
//! Independent detectors evaluated against a trade at open time. Each
//! detector is a pure function of the trade and a [`BehaviorContext`]
//! snapshot loaded by the caller, and yields at most one alert.

mod discipline;
mod exposure;
mod news;
mod risk;
mod session;

pub use discipline::{Overtrading, RevengeTrading, WinnerCutting};
pub use exposure::CorrelationStacking;
pub use news::NewsRisk;
pub use risk::{ExcessiveRisk, MissingProtection, RiskSetup};
pub use session::SessionDiscipline;

use crate::domain::entities::behavioral_alert::BehavioralAlert;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trading_rules::TradingRules;
use crate::domain::repositories::economic_calendar::EconomicEvent;
use crate::domain::value_objects::pnl::PnlTiers;
use chrono::{DateTime, Duration, Utc};

/// Lookback of the weak-session statistics
pub const SESSION_LOOKBACK_DAYS: i64 = 60;
/// Lookback of the winner-cutting and overtrading averages
pub const BEHAVIOR_LOOKBACK_DAYS: i64 = 30;
/// Calendar window around the open time considered news risk
pub const NEWS_WINDOW_MINUTES: i64 = 15;

/// History and settings a detector may look at
#[derive(Debug, Clone)]
pub struct BehaviorContext {
    pub rules: TradingRules,
    pub account_balance: f64,
    pub now: DateTime<Utc>,
    /// Closed trades within [`SESSION_LOOKBACK_DAYS`], newest close first
    pub recent_closed: Vec<Trade>,
    /// Trades opened on the candidate's UTC day, the candidate included
    pub opened_today: u32,
    /// Trades opened in the [`BEHAVIOR_LOOKBACK_DAYS`] days before that day
    pub opened_last_30_days: u32,
    /// The user's other OPEN trades
    pub open_trades: Vec<Trade>,
    /// Calendar events near the open time
    pub calendar_events: Vec<EconomicEvent>,
}

impl BehaviorContext {
    pub fn empty(rules: TradingRules, account_balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            rules,
            account_balance,
            now,
            recent_closed: Vec::new(),
            opened_today: 0,
            opened_last_30_days: 0,
            open_trades: Vec::new(),
            calendar_events: Vec::new(),
        }
    }

    /// Closed trades whose close falls within the last `days`
    pub fn closed_within(&self, days: i64) -> impl Iterator<Item = &Trade> {
        let since = self.now - Duration::days(days);
        self.recent_closed
            .iter()
            .filter(move |t| t.close_time.map(|c| c >= since).unwrap_or(false))
    }
}

pub trait BehavioralDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert>;
}

pub struct BehavioralEngine {
    detectors: Vec<Box<dyn BehavioralDetector>>,
}

impl BehavioralEngine {
    pub fn new(detectors: Vec<Box<dyn BehavioralDetector>>) -> Self {
        Self { detectors }
    }

    /// Every built-in detector with the default P&L tiers
    pub fn standard() -> Self {
        Self::with_tiers(PnlTiers::default())
    }

    /// Every built-in detector, valuing risk with `tiers`
    pub fn with_tiers(tiers: PnlTiers) -> Self {
        Self::new(vec![
            Box::new(RevengeTrading),
            Box::new(Overtrading),
            Box::new(SessionDiscipline),
            Box::new(CorrelationStacking),
            Box::new(WinnerCutting),
            Box::new(MissingProtection),
            Box::new(RiskSetup),
            Box::new(ExcessiveRisk::new(tiers)),
            Box::new(NewsRisk),
        ])
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn evaluate(&self, trade: &Trade, ctx: &BehaviorContext) -> Vec<BehavioralAlert> {
        self.detectors
            .iter()
            .filter_map(|detector| detector.detect(trade, ctx))
            .collect()
    }
}

impl Default for BehavioralEngine {
    fn default() -> Self {
        Self::standard()
    }
}
