use super::{BehaviorContext, BehavioralDetector, SESSION_LOOKBACK_DAYS};
use crate::domain::entities::behavioral_alert::{BehavioralAlert, Severity};
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::market::TradingSession;
use serde_json::json;

const WEAK_SESSION_MIN_SAMPLES: usize = 10;
const WEAK_SESSION_WIN_RATE: f64 = 0.35;

/// Trading in a session the user blocked, or one they historically lose in.
/// A blocked session takes precedence over a weak one.
pub struct SessionDiscipline;

impl BehavioralDetector for SessionDiscipline {
    fn name(&self) -> &'static str {
        "session"
    }

    fn detect(&self, trade: &Trade, ctx: &BehaviorContext) -> Option<BehavioralAlert> {
        let session = TradingSession::at(trade.open_time);

        if ctx.rules.is_session_blocked(session.as_str()) {
            return Some(
                BehavioralAlert::new(
                    "blocked_session",
                    Severity::Critical,
                    format!("Trading during the {} session, which your rules block.", session),
                )
                .with_details(json!({ "session": session.as_str() })),
            );
        }

        if session == TradingSession::OffHours {
            return None;
        }

        let outcomes: Vec<bool> = ctx
            .closed_within(SESSION_LOOKBACK_DAYS)
            .filter(|t| session.contains(t.open_time))
            .filter_map(|t| t.pnl.map(|p| p > 0.0))
            .collect();

        if outcomes.len() < WEAK_SESSION_MIN_SAMPLES {
            return None;
        }

        let wins = outcomes.iter().filter(|w| **w).count();
        let win_rate = wins as f64 / outcomes.len() as f64;
        if win_rate >= WEAK_SESSION_WIN_RATE {
            return None;
        }

        Some(
            BehavioralAlert::new(
                "weak_session",
                Severity::Medium,
                format!(
                    "Your win rate in the {} session is {:.0}% over {} trades.",
                    session,
                    win_rate * 100.0,
                    outcomes.len()
                ),
            )
            .with_details(json!({
                "session": session.as_str(),
                "win_rate": (win_rate * 1000.0).round() / 1000.0,
                "sample_size": outcomes.len(),
            })),
        )
    }
}
