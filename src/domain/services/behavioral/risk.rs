use super::{BehaviorContext, BehavioralDetector};
use crate::domain::entities::behavioral_alert::{BehavioralAlert, Severity};
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::pnl::{round_to, PnlTiers};
use serde_json::json;

/// Stop-loss or take-profit missing
pub struct MissingProtection;

impl BehavioralDetector for MissingProtection {
    fn name(&self) -> &'static str {
        "missing_sl_tp"
    }

    fn detect(&self, trade: &Trade, _ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let mut missing = Vec::new();
        if trade.stop_loss.is_none() {
            missing.push("Stop Loss");
        }
        if trade.take_profit.is_none() {
            missing.push("Take Profit");
        }
        if missing.is_empty() {
            return None;
        }

        Some(
            BehavioralAlert::new(
                self.name(),
                Severity::Critical,
                format!(
                    "Trade has no {} set. Define the exit before entering.",
                    missing.join(" or ")
                ),
            )
            .with_details(json!({ "missing": missing })),
        )
    }
}

/// Reward to risk missing or below the configured minimum
pub struct RiskSetup;

impl BehavioralDetector for RiskSetup {
    fn name(&self) -> &'static str {
        "bad_rr"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let minimum = ctx.rules.min_risk_reward;

        let Some(rr) = trade.planned_risk_reward() else {
            return Some(
                BehavioralAlert::new(
                    self.name(),
                    Severity::High,
                    "Reward to risk is undefined without both a stop-loss and a take-profit.",
                )
                .with_details(json!({ "rr": "undefined", "min_required": minimum })),
            );
        };

        if rr >= minimum {
            return None;
        }

        let severity = if rr >= 1.0 {
            Severity::Medium
        } else {
            Severity::High
        };
        Some(
            BehavioralAlert::new(
                self.name(),
                severity,
                format!(
                    "Reward to risk of 1:{:.2} is below your minimum of 1:{:.2}.",
                    rr, minimum
                ),
            )
            .with_details(json!({ "rr": round_to(rr, 2), "min_required": minimum })),
        )
    }
}

/// Monetary risk above the allowed share of the balance
#[derive(Default)]
pub struct ExcessiveRisk {
    tiers: PnlTiers,
}

impl ExcessiveRisk {
    pub fn new(tiers: PnlTiers) -> Self {
        Self { tiers }
    }
}

impl BehavioralDetector for ExcessiveRisk {
    fn name(&self) -> &'static str {
        "excessive_risk"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let max_percent = ctx.rules.max_risk_percent;

        let Some(risk_amount) = self
            .tiers
            .risk_amount(trade.entry_price, trade.stop_loss, trade.size)
        else {
            return Some(
                BehavioralAlert::new(
                    self.name(),
                    Severity::Critical,
                    "No stop-loss: the risk on this trade is unlimited.",
                )
                .with_details(json!({ "risk_percent": "unlimited", "max_allowed": max_percent })),
            );
        };

        if ctx.account_balance <= 0.0 {
            return None;
        }

        let risk_percent = risk_amount / ctx.account_balance * 100.0;
        if risk_percent <= max_percent {
            return None;
        }

        let severity = if risk_percent > 2.0 * max_percent {
            Severity::Critical
        } else {
            Severity::High
        };
        Some(
            BehavioralAlert::new(
                self.name(),
                severity,
                format!(
                    "Risking {:.2}% of the account, above your limit of {:.2}%.",
                    risk_percent, max_percent
                ),
            )
            .with_details(json!({
                "risk_percent": round_to(risk_percent, 2),
                "risk_amount": round_to(risk_amount, 2),
                "max_allowed": max_percent,
                "account_balance": ctx.account_balance,
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
    fn test_missing_protection_lists_fields() {
        let mut trade = open_trade("t", "p", "EURUSD", Direction::Buy);
        trade.take_profit = None;
        let alert = MissingProtection.detect(&trade, &context()).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.details["missing"], json!(["Take Profit"]));
    }

    #[test]
    fn test_risk_reward_severity_bands() {
        let ctx = context();
        let mut trade = open_trade("t", "p", "EURUSD", Direction::Buy);

        // risk 30 pips, reward 36 pips: 1.2
        trade.take_profit = Some(1.0886);
        assert_eq!(RiskSetup.detect(&trade, &ctx).unwrap().severity, Severity::Medium);

        // reward 15 pips: 0.5
        trade.take_profit = Some(1.0865);
        assert_eq!(RiskSetup.detect(&trade, &ctx).unwrap().severity, Severity::High);

        // reward 60 pips: 2.0
        trade.take_profit = Some(1.0910);
        assert!(RiskSetup.detect(&trade, &ctx).is_none());
    }

    #[test]
    fn test_excessive_risk_tiers() {
        let ctx = context();
        let detector = ExcessiveRisk::default();
        let mut trade = open_trade("t", "p", "EURUSD", Direction::Buy);

        // 30 pips on 1 lot = 300, 3% of 10k
        trade.size = 1.0;
        let alert = detector.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::High);

        // 30 pips on 2 lots = 600, 6% of 10k
        trade.size = 2.0;
        let alert = detector.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.severity, Severity::Critical);

        trade.size = 0.1;
        assert!(detector.detect(&trade, &ctx).is_none());

        trade.stop_loss = None;
        let alert = detector.detect(&trade, &ctx).unwrap();
        assert_eq!(alert.details["risk_percent"], "unlimited");
    }
}
