//! Inputs to the trade processor.
//!
//! These are produced by the position diff, the reconciliation sweep and the
//! manual simulation endpoints.

use crate::domain::entities::position::{ClosingDeal, Position};
use crate::domain::entities::trade::Direction;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A position that appeared on the broker side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedTrade {
    pub external_id: String,
    pub account_id: Option<String>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub size: f64,
    pub open_time: Option<DateTime<Utc>>,
}

impl OpenedTrade {
    pub fn from_position(account_id: &str, position: &Position) -> Self {
        Self {
            external_id: position.id.clone(),
            account_id: Some(account_id.to_string()),
            symbol: position.symbol.clone(),
            direction: position.direction,
            entry_price: position.open_price,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            size: position.volume,
            open_time: position.open_time,
        }
    }
}

/// A position that disappeared on the broker side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub external_id: String,
    /// Zero or missing means "unknown", the entry price is used instead
    pub exit_price: Option<f64>,
    /// Broker-reported P&L, preferred over the computed one
    pub pnl: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
}

impl ClosedTrade {
    /// Build a close from the authoritative deal if there is one, otherwise
    /// from the last-known state of the position.
    pub fn resolve(position: &Position, deal: Option<&ClosingDeal>) -> Self {
        match deal {
            Some(deal) => Self {
                external_id: position.id.clone(),
                exit_price: Some(deal.price),
                pnl: Some(deal.profit),
                close_time: Some(deal.time),
            },
            None => Self {
                external_id: position.id.clone(),
                exit_price: position.current_price,
                pnl: position.profit,
                close_time: None,
            },
        }
    }
}

/// Protective levels changed on an open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedTrade {
    pub external_id: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl From<&Position> for ModifiedTrade {
    fn from(position: &Position) -> Self {
        Self {
            external_id: position.id.clone(),
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
        }
    }
}

/// Manually entered trade used for simulation mode
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedOpen {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    #[serde(default = "default_entry_price")]
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    #[serde(default = "default_size")]
    pub size: f64,
    /// Close the trade on its own after this many seconds
    #[serde(default)]
    pub close_after_seconds: Option<u64>,
}

/// Exit price of a simulated trade that closes on its own.
///
/// Lands near the take-profit 55% of the time and near the stop-loss 35% of
/// the time. The rest exits anywhere between the two levels, or within 50
/// pips of the entry when a level is missing.
pub fn auto_close_price<R: Rng + ?Sized>(
    direction: Direction,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    rng: &mut R,
) -> f64 {
    const NOISE: f64 = 0.0005;
    const FALLBACK_RANGE: f64 = 0.005;

    let outcome: f64 = rng.gen();
    let price = match (take_profit, stop_loss) {
        (Some(tp), _) if outcome < 0.55 => tp + rng.gen_range(-NOISE..=NOISE),
        (_, Some(sl)) if outcome < 0.90 => sl + rng.gen_range(-NOISE..=NOISE),
        _ => {
            let (low, high) = match direction {
                Direction::Buy => (
                    stop_loss.unwrap_or(entry_price - FALLBACK_RANGE),
                    take_profit.unwrap_or(entry_price + FALLBACK_RANGE),
                ),
                Direction::Sell => (
                    take_profit.unwrap_or(entry_price - FALLBACK_RANGE),
                    stop_loss.unwrap_or(entry_price + FALLBACK_RANGE),
                ),
            };
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            rng.gen_range(low..=high)
        }
    };
    (price * 100_000.0).round() / 100_000.0
}

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_direction() -> Direction {
    Direction::Buy
}

fn default_entry_price() -> f64 {
    1.085
}

fn default_size() -> f64 {
    0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position() -> Position {
        Position {
            id: "42".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Sell,
            open_price: 1.09,
            current_price: Some(1.087),
            stop_loss: Some(1.093),
            take_profit: Some(1.08),
            volume: 0.2,
            open_time: None,
            profit: Some(60.0),
        }
    }

    #[test]
    fn test_resolve_prefers_deal_history() {
        let deal = ClosingDeal {
            position_id: "42".to_string(),
            price: 1.0855,
            profit: 87.5,
            time: Utc::now(),
        };
        let closed = ClosedTrade::resolve(&position(), Some(&deal));
        assert_eq!(closed.exit_price, Some(1.0855));
        assert_eq!(closed.pnl, Some(87.5));
        assert!(closed.close_time.is_some());
    }

    #[test]
    fn test_resolve_falls_back_to_last_known_state() {
        let closed = ClosedTrade::resolve(&position(), None);
        assert_eq!(closed.exit_price, Some(1.087));
        assert_eq!(closed.pnl, Some(60.0));
        assert!(closed.close_time.is_none());
    }

    #[test]
    fn test_simulated_open_defaults() {
        let open: SimulatedOpen = serde_json::from_str("{}").unwrap();
        assert_eq!(open.symbol, "EURUSD");
        assert_eq!(open.direction, Direction::Buy);
        assert_eq!(open.size, 0.1);
        assert_eq!(open.close_after_seconds, None);
    }

    #[test]
    fn test_auto_close_price_stays_near_levels() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(7);
        let mut near_tp = 0;
        let mut near_sl = 0;
        for _ in 0..1000 {
            let price = auto_close_price(Direction::Buy, 1.085, Some(1.082), Some(1.092), &mut rng);
            assert!((1.0815..=1.0925).contains(&price), "price {}", price);
            assert_eq!(price, (price * 100_000.0).round() / 100_000.0);
            if (price - 1.092).abs() <= 0.0005 {
                near_tp += 1;
            } else if (price - 1.082).abs() <= 0.0005 {
                near_sl += 1;
            }
        }
        assert!(near_tp > 400, "{} near take-profit", near_tp);
        assert!(near_sl > 250, "{} near stop-loss", near_sl);
    }

    #[test]
    fn test_auto_close_price_without_levels_stays_around_entry() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let price = auto_close_price(Direction::Sell, 1.27, None, None, &mut rng);
            assert!((1.265..=1.275).contains(&price), "price {}", price);
        }
    }
}
