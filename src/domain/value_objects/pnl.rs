//! Price-magnitude P&L tiers
//!
//! Instruments are not tagged with contract specs, so the monetary value of a
//! price move is inferred from the magnitude of the entry price:
//!
//! - above `direct_above` (indices, crypto) the move is money per unit
//! - above `pip_above` (gold, JPY pairs) a pip is 0.01
//! - otherwise (standard forex) a pip is 0.0001
//!
//! Pip tiers value one pip at [`PIP_VALUE_PER_LOT`] per lot.

use crate::domain::entities::trade::Trade;
use crate::domain::entities::trade_event::ClosedTrade;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monetary value of one pip for one standard lot
pub const PIP_VALUE_PER_LOT: f64 = 10.0;

const JPY_STYLE_PIP: f64 = 0.01;
const STANDARD_PIP: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceTier {
    /// P&L is the price difference times size
    Direct,
    /// P&L is counted in pips of the given size
    Pip(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlTiers {
    pub direct_above: f64,
    pub pip_above: f64,
}

impl Default for PnlTiers {
    fn default() -> Self {
        Self {
            direct_above: 10_000.0,
            pip_above: 20.0,
        }
    }
}

impl PnlTiers {
    pub fn is_valid(&self) -> bool {
        self.pip_above > 0.0 && self.direct_above > self.pip_above
    }

    pub fn tier_for(&self, reference_price: f64) -> PriceTier {
        if reference_price > self.direct_above {
            PriceTier::Direct
        } else if reference_price > self.pip_above {
            PriceTier::Pip(JPY_STYLE_PIP)
        } else {
            PriceTier::Pip(STANDARD_PIP)
        }
    }

    /// Money represented by `price_move` on `size` lots of an instrument
    /// trading around `reference_price`.
    pub fn money_for_move(&self, reference_price: f64, price_move: f64, size: f64) -> f64 {
        match self.tier_for(reference_price) {
            PriceTier::Direct => price_move * size,
            PriceTier::Pip(pip) => (price_move / pip) * PIP_VALUE_PER_LOT * size,
        }
    }

    /// Money lost if the stop-loss is hit, `None` without a stop-loss
    pub fn risk_amount(&self, entry_price: f64, stop_loss: Option<f64>, size: f64) -> Option<f64> {
        let sl = stop_loss?;
        Some(self.money_for_move(entry_price, (entry_price - sl).abs(), size))
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Outcome of closing one trade row
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_r: Option<f64>,
    pub duration_seconds: i64,
    pub close_time: DateTime<Utc>,
}

impl Settlement {
    pub fn compute(
        trade: &Trade,
        close: &ClosedTrade,
        close_time: DateTime<Utc>,
        tiers: &PnlTiers,
    ) -> Self {
        let exit_price = match close.exit_price {
            Some(price) if price != 0.0 && price.is_finite() => price,
            _ => trade.entry_price,
        };

        let pnl = match close.pnl {
            Some(broker_pnl) if broker_pnl.is_finite() => round_to(broker_pnl, 2),
            _ => {
                let favourable_move = (exit_price - trade.entry_price) * trade.direction.sign();
                round_to(
                    tiers.money_for_move(trade.entry_price, favourable_move, trade.size),
                    2,
                )
            }
        };

        let pnl_r = tiers
            .risk_amount(trade.entry_price, trade.stop_loss, trade.size)
            .filter(|risk| *risk > 0.0 && trade.size > 0.0)
            .map(|risk| round_to(pnl / risk, 3));

        let duration_seconds = (close_time - trade.open_time).num_seconds().max(0);

        Self {
            exit_price,
            pnl,
            pnl_r,
            duration_seconds,
            close_time,
        }
    }
}
