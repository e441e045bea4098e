use super::{BehaviorContext, BehavioralDetector, BEHAVIOR_LOOKBACK_DAYS};
use crate::domain::entities::behavioral_alert::{BehavioralAlert, Severity};
use crate::domain::entities::trade::Trade;
use chrono::Duration;
use serde_json::json;

/// Minimum winners and losers before hold times are compared
const WINNER_CUTTING_MIN_SAMPLES: usize = 5;
const WINNER_CUTTING_RATIO: f64 = 0.5;

/// A new trade shortly after a losing close
pub struct RevengeTrading;

impl BehavioralDetector for RevengeTrading {
    fn name(&self) -> &'static str {
        "revenge_trading"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let cooldown = Duration::minutes(i64::from(ctx.rules.min_minutes_between_trades));

        let last_loss = ctx
            .recent_closed
            .iter()
            .filter(|t| t.is_loser())
            .filter_map(|t| t.close_time.map(|c| (t, c)))
            .filter(|(_, closed)| *closed <= trade.open_time)
            .max_by_key(|(_, closed)| *closed)?;

        let (loser, closed_at) = last_loss;
        let since = trade.open_time - closed_at;
        if since >= cooldown {
            return None;
        }

        let minutes = since.num_seconds() as f64 / 60.0;
        Some(
            BehavioralAlert::new(
                self.name(),
                Severity::High,
                format!(
                    "New trade {:.1} minutes after a loss on {}. Take a break before re-entering.",
                    minutes, loser.symbol
                ),
            )
            .with_details(json!({
                "minutes_since_loss": (minutes * 10.0).round() / 10.0,
                "last_loss_pnl": loser.pnl,
                "last_loss_symbol": loser.symbol,
                "cooldown_minutes": ctx.rules.min_minutes_between_trades,
            })),
        )
    }
}

/// Too many trades today, in absolute terms or relative to the usual pace
pub struct Overtrading;

impl BehavioralDetector for Overtrading {
    fn name(&self) -> &'static str {
        "overtrading"
    }

    fn detect(&self, _trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let today = ctx.opened_today;
        let cap = ctx.rules.max_trades_per_day;

        if today >= cap {
            return Some(
                BehavioralAlert::new(
                    self.name(),
                    Severity::Critical,
                    format!(
                        "Daily limit reached: {} trades today against a maximum of {}.",
                        today, cap
                    ),
                )
                .with_details(json!({ "today_count": today, "max_trades_per_day": cap })),
            );
        }

        let daily_average = f64::from(ctx.opened_last_30_days) / BEHAVIOR_LOOKBACK_DAYS as f64;
        if daily_average >= 1.0 && f64::from(today) > 2.0 * daily_average {
            return Some(
                BehavioralAlert::new(
                    self.name(),
                    Severity::High,
                    format!(
                        "{} trades today, more than double the usual {:.1} per day.",
                        today, daily_average
                    ),
                )
                .with_details(json!({
                    "today_count": today,
                    "daily_average": (daily_average * 10.0).round() / 10.0,
                })),
            );
        }

        None
    }
}

/// Winners closed much faster than losers
pub struct WinnerCutting;

impl BehavioralDetector for WinnerCutting {
    fn name(&self) -> &'static str {
        "winner_cutting"
    }

    fn detect(&self, _trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let mut winners = Vec::new();
        let mut losers = Vec::new();
        for closed in ctx.closed_within(BEHAVIOR_LOOKBACK_DAYS) {
            let Some(duration) = closed.duration_seconds else {
                continue;
            };
            if closed.is_winner() {
                winners.push(duration as f64);
            } else if closed.is_loser() {
                losers.push(duration as f64);
            }
        }

        if winners.len() < WINNER_CUTTING_MIN_SAMPLES || losers.len() < WINNER_CUTTING_MIN_SAMPLES {
            return None;
        }

        let avg_winner = winners.iter().sum::<f64>() / winners.len() as f64;
        let avg_loser = losers.iter().sum::<f64>() / losers.len() as f64;
        if avg_loser <= 0.0 {
            return None;
        }

        let ratio = avg_winner / avg_loser;
        if ratio >= WINNER_CUTTING_RATIO {
            return None;
        }

        Some(
            BehavioralAlert::new(
                self.name(),
                Severity::Medium,
                format!(
                    "Winners are held {:.0}% as long as losers. Let profitable trades run to target.",
                    ratio * 100.0
                ),
            )
            .with_details(json!({
                "avg_winner_minutes": (avg_winner / 60.0).round(),
                "avg_loser_minutes": (avg_loser / 60.0).round(),
                "ratio": (ratio * 100.0).round() / 100.0,
                "winners": winners.len(),
                "losers": losers.len(),
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{closed_trade, context};
    use super::*;
    use crate::domain::entities::trade::test_support::open_trade;
    use crate::domain::entities::trade::Direction;

    #[test]
    fn test_revenge_within_cooldown() {
        let mut ctx = context();
        let trade = {
            let mut t = open_trade("new", "p9", "EURUSD", Direction::Buy);
            t.open_time = ctx.now;
            t
        };
        ctx.recent_closed = vec![closed_trade(
            "loss",
            -45.0,
            Duration::minutes(4),
            Duration::minutes(20),
            ctx.now,
        )];

        let alert = RevengeTrading.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.details["last_loss_pnl"], -45.0);
    }

    #[test]
    fn test_no_revenge_after_cooldown_or_after_win() {
        let mut ctx = context();
        let mut trade = open_trade("new", "p9", "EURUSD", Direction::Buy);
        trade.open_time = ctx.now;

        ctx.recent_closed = vec![closed_trade(
            "old-loss",
            -45.0,
            Duration::minutes(25),
            Duration::minutes(20),
            ctx.now,
        )];
        assert!(RevengeTrading.detect(&trade, &ctx).is_none());

        ctx.recent_closed = vec![closed_trade(
            "win",
            80.0,
            Duration::minutes(2),
            Duration::minutes(20),
            ctx.now,
        )];
        assert!(RevengeTrading.detect(&trade, &ctx).is_none());
    }

    #[test]
    fn test_overtrading_cap_is_critical() {
        let mut ctx = context();
        ctx.opened_today = 5;
        let trade = open_trade("t", "p", "EURUSD", Direction::Buy);
        let alert = Overtrading.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn test_overtrading_against_average() {
        let mut ctx = context();
        ctx.rules.max_trades_per_day = 50;
        ctx.opened_last_30_days = 45; // 1.5 per day
        let trade = open_trade("t", "p", "EURUSD", Direction::Buy);

        ctx.opened_today = 3;
        assert!(Overtrading.detect(&trade, &ctx).is_none());

        ctx.opened_today = 4;
        let alert = Overtrading.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_winner_cutting_needs_samples_and_ratio() {
        let mut ctx = context();
        let trade = open_trade("t", "p", "EURUSD", Direction::Buy);
        let now = ctx.now;

        let mut history = Vec::new();
        for i in 0..5 {
            history.push(closed_trade(
                &format!("w{}", i),
                30.0,
                Duration::days(1),
                Duration::minutes(10),
                now,
            ));
            history.push(closed_trade(
                &format!("l{}", i),
                -30.0,
                Duration::days(1),
                Duration::minutes(60),
                now,
            ));
        }
        ctx.recent_closed = history.clone();
        let alert = WinnerCutting.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::Medium);

        ctx.recent_closed = history[..8].to_vec();
        assert!(WinnerCutting.detect(&trade, &ctx).is_none());
    }
}
