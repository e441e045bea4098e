//! Trading sessions and asset classes

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// UTC trading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingSession {
    Asian,
    London,
    NewYork,
    OffHours,
}

impl TradingSession {
    /// Sessions in lookup priority order, with their `[start, end)` UTC hours
    pub const WINDOWS: [(TradingSession, u32, u32); 3] = [
        (TradingSession::NewYork, 13, 22),
        (TradingSession::London, 7, 16),
        (TradingSession::Asian, 0, 9),
    ];

    /// Session for a UTC hour. Overlaps resolve New York, then London, then Asian.
    pub fn for_hour(hour: u32) -> Self {
        Self::WINDOWS
            .iter()
            .find(|(_, start, end)| hour >= *start && hour < *end)
            .map(|(session, _, _)| *session)
            .unwrap_or(TradingSession::OffHours)
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self::for_hour(time.hour())
    }

    /// UTC hour range of this session, `None` for off hours
    pub fn hours(&self) -> Option<(u32, u32)> {
        Self::WINDOWS
            .iter()
            .find(|(session, _, _)| session == self)
            .map(|(_, start, end)| (*start, *end))
    }

    /// True when `time` falls inside this session's raw hour window
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        match self.hours() {
            Some((start, end)) => {
                let hour = time.hour();
                hour >= start && hour < end
            }
            None => TradingSession::at(time) == TradingSession::OffHours,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingSession::Asian => "asian",
            TradingSession::London => "london",
            TradingSession::NewYork => "new_york",
            TradingSession::OffHours => "off_hours",
        }
    }
}

impl fmt::Display for TradingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    UsdPairs,
    EurPairs,
    GbpPairs,
    JpyPairs,
    Gold,
    Indices,
    Oil,
}

const USD_PAIRS: &[&str] = &["EURUSD", "GBPUSD", "USDJPY", "USDCHF", "USDCAD", "AUDUSD", "NZDUSD"];
const EUR_PAIRS: &[&str] = &["EURUSD", "EURGBP", "EURJPY", "EURCHF", "EURAUD", "EURCAD", "EURNZD"];
const GBP_PAIRS: &[&str] = &["GBPUSD", "EURGBP", "GBPJPY", "GBPCHF", "GBPAUD", "GBPCAD", "GBPNZD"];
const JPY_PAIRS: &[&str] = &["USDJPY", "EURJPY", "GBPJPY", "CHFJPY", "AUDJPY", "CADJPY", "NZDJPY"];
const GOLD: &[&str] = &["XAUUSD", "GOLD"];
const INDICES: &[&str] = &["US30", "US500", "NAS100", "DE40", "UK100", "JP225"];
const OIL: &[&str] = &["USOIL", "UKOIL", "XTIUSD", "XBRUSD"];

const CLASS_TABLE: [(AssetClass, &[&str]); 7] = [
    (AssetClass::UsdPairs, USD_PAIRS),
    (AssetClass::EurPairs, EUR_PAIRS),
    (AssetClass::GbpPairs, GBP_PAIRS),
    (AssetClass::JpyPairs, JPY_PAIRS),
    (AssetClass::Gold, GOLD),
    (AssetClass::Indices, INDICES),
    (AssetClass::Oil, OIL),
];

impl AssetClass {
    /// Every class a broker symbol belongs to. A cross such as `EURUSD` is in
    /// both the USD and EUR groups. Suffixes such as `.m` or `-pro` are ignored.
    pub fn classes_of(symbol: &str) -> Vec<Self> {
        let normalized = symbol
            .split(['.', '-', '_'])
            .next()
            .unwrap_or(symbol)
            .to_uppercase();

        CLASS_TABLE
            .iter()
            .filter(|(_, symbols)| symbols.contains(&normalized.as_str()))
            .map(|(class, _)| *class)
            .collect()
    }

    /// Classes shared by two symbols
    pub fn shared(a: &str, b: &str) -> Vec<Self> {
        let b_classes = Self::classes_of(b);
        Self::classes_of(a)
            .into_iter()
            .filter(|class| b_classes.contains(class))
            .collect()
    }
}
