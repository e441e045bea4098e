use super::{BehaviorContext, BehavioralDetector};
use crate::domain::entities::behavioral_alert::{BehavioralAlert, Severity};
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::market::AssetClass;
use serde_json::json;

/// Open trades that must share an asset class and direction with the new one
const STACKING_THRESHOLD: usize = 2;

/// Several open positions betting on the same move
pub struct CorrelationStacking;

impl BehavioralDetector for CorrelationStacking {
    fn name(&self) -> &'static str {
        "correlation_stacking"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let correlated: Vec<serde_json::Value> = ctx
            .open_trades
            .iter()
            .filter(|other| other.id != trade.id && other.direction == trade.direction)
            .filter_map(|other| {
                let shared = AssetClass::shared(&trade.symbol, &other.symbol);
                if shared.is_empty() {
                    None
                } else {
                    Some(json!({
                        "symbol": other.symbol,
                        "direction": other.direction,
                        "shared_classes": shared,
                    }))
                }
            })
            .collect();

        if correlated.len() < STACKING_THRESHOLD {
            return None;
        }

        let symbols: Vec<&str> = correlated
            .iter()
            .filter_map(|c| c["symbol"].as_str())
            .collect();

        Some(
            BehavioralAlert::new(
                self.name(),
                Severity::High,
                format!(
                    "{} {} is correlated with open trades on {}. This multiplies the exposure.",
                    trade.symbol,
                    trade.direction,
                    symbols.join(", ")
                ),
            )
            .with_details(json!({
                "new_trade_symbol": trade.symbol,
                "total_correlated": correlated.len(),
                "correlated_trades": correlated,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::domain::entities::trade::test_support::open_trade;
    use crate::domain::entities::trade::Direction;

    #[test]
    fn test_needs_two_correlated_trades() {
        let mut ctx = context();
        let trade = open_trade("new", "p0", "EURUSD", Direction::Buy);

        ctx.open_trades = vec![open_trade("a", "p1", "GBPUSD", Direction::Buy)];
        assert!(CorrelationStacking.detect(&trade, &ctx).is_none());

        ctx.open_trades.push(open_trade("b", "p2", "EURJPY", Direction::Buy));
        let alert = CorrelationStacking.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.details["total_correlated"], 2);
    }

    #[test]
    fn test_opposite_direction_or_unrelated_symbol_ignored() {
        let mut ctx = context();
        let trade = open_trade("new", "p0", "EURUSD", Direction::Buy);
        ctx.open_trades = vec![
            open_trade("a", "p1", "GBPUSD", Direction::Sell),
            open_trade("b", "p2", "US30", Direction::Buy),
            open_trade("c", "p3", "XAUUSD", Direction::Buy),
        ];
        assert!(CorrelationStacking.detect(&trade, &ctx).is_none());
    }
}
