use super::{BehaviorContext, BehavioralDetector, NEWS_WINDOW_MINUTES};
use crate::domain::entities::behavioral_alert::{BehavioralAlert, Severity};
use crate::domain::entities::trade::Trade;
use crate::domain::repositories::economic_calendar::EventImpact;
use serde_json::json;

/// Opening right around a high-impact release
pub struct NewsRisk;

impl BehavioralDetector for NewsRisk {
    fn name(&self) -> &'static str {
        "news_gambling"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let window_seconds = NEWS_WINDOW_MINUTES * 60;
        let nearby: Vec<_> = ctx
            .calendar_events
            .iter()
            .filter(|e| e.impact >= EventImpact::High)
            .filter(|e| (e.time - trade.open_time).num_seconds().abs() <= window_seconds)
            .collect();

        if nearby.is_empty() {
            return None;
        }

        let titles: Vec<&str> = nearby.iter().map(|e| e.title.as_str()).collect();
        Some(
            BehavioralAlert::new(
                self.name(),
                Severity::High,
                format!(
                    "High-impact news within {} minutes: {}.",
                    NEWS_WINDOW_MINUTES,
                    titles.join(", ")
                ),
            )
            .with_details(json!({ "events": nearby })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::domain::entities::trade::test_support::open_trade;
    use crate::domain::entities::trade::Direction;
    use crate::domain::repositories::economic_calendar::EconomicEvent;
    use chrono::Duration;

    #[test]
    fn test_only_high_impact_inside_window() {
        let mut ctx = context();
        let trade = open_trade("t", "p", "EURUSD", Direction::Buy);
        let event = |title: &str, impact, offset: i64| EconomicEvent {
            title: title.to_string(),
            currency: "USD".to_string(),
            impact,
            time: trade.open_time + Duration::minutes(offset),
        };

        ctx.calendar_events = vec![
            event("Retail Sales", EventImpact::Medium, 5),
            event("FOMC", EventImpact::High, 40),
        ];
        assert!(NewsRisk.detect(&trade, &ctx).is_none());

        ctx.calendar_events.push(event("NFP", EventImpact::Critical, -10));
        let alert = NewsRisk.detect(&trade, &ctx).unwrap();
        assert!(alert.message.contains("NFP"));
    }
}
