use serde::{Deserialize, Serialize};

/// Per-user rule configuration. Owned by the account service, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingRules {
    pub max_risk_percent: f64,
    pub min_risk_reward: f64,
    pub max_trades_per_day: u32,
    /// Session names such as `asian` or `new_york`
    pub blocked_sessions: Vec<String>,
    pub min_minutes_between_trades: u32,
}

impl Default for TradingRules {
    fn default() -> Self {
        Self {
            max_risk_percent: 2.0,
            min_risk_reward: 1.5,
            max_trades_per_day: 5,
            blocked_sessions: Vec::new(),
            min_minutes_between_trades: 10,
        }
    }
}

impl TradingRules {
    pub fn is_session_blocked(&self, session: &str) -> bool {
        self.blocked_sessions
            .iter()
            .any(|s| s.eq_ignore_ascii_case(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let rules = TradingRules::default();
        assert_eq!(rules.max_risk_percent, 2.0);
        assert_eq!(rules.min_risk_reward, 1.5);
        assert_eq!(rules.max_trades_per_day, 5);
        assert_eq!(rules.min_minutes_between_trades, 10);
        assert!(rules.blocked_sessions.is_empty());
    }

    #[test]
    fn test_blocked_session_match_is_case_insensitive() {
        let rules = TradingRules {
            blocked_sessions: vec!["Asian".to_string()],
            ..TradingRules::default()
        };
        assert!(rules.is_session_blocked("asian"));
        assert!(!rules.is_session_blocked("london"));
    }
}
