//! Trade scoring
//!
//! The scoring backend is opaque to the pipeline: anything implementing
//! [`TradeScorer`] can be plugged in. [`HeuristicScorer`] is a deterministic
//! rule-based scorer; [`fallback_score`] and [`fallback_review`] are what the
//! pipeline stores when the configured scorer keeps failing.

use crate::domain::entities::behavioral_alert::Severity;
use crate::domain::entities::trade::Trade;
use crate::domain::errors::ScoringError;
use crate::domain::value_objects::assessment::{Assessment, TradeReview, TradeScore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stop-loss / take-profit change that triggered a re-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub old_stop_loss: Option<f64>,
    pub old_take_profit: Option<f64>,
    pub new_stop_loss: Option<f64>,
    pub new_take_profit: Option<f64>,
}

impl LevelChange {
    /// Positive when the stop moved towards profit, negative when it was widened
    fn stop_shift(&self, trade: &Trade) -> Option<f64> {
        let old = self.old_stop_loss?;
        let new = self.new_stop_loss?;
        Some((new - old) * trade.direction.sign())
    }
}

#[async_trait]
pub trait TradeScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score_pre_trade(&self, trade: &Trade) -> Result<TradeScore, ScoringError>;

    async fn score_modification(
        &self,
        trade: &Trade,
        change: &LevelChange,
        prior: Option<&Assessment>,
    ) -> Result<TradeScore, ScoringError>;

    async fn review_closed(&self, trade: &Trade) -> Result<TradeReview, ScoringError>;
}

fn severity_penalty(severity: Severity) -> i32 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
        Severity::Critical => 3,
    }
}

fn clamp_score(value: i32) -> u8 {
    value.clamp(1, 10) as u8
}

/// Deterministic local scorer
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    fn base_score(trade: &Trade) -> (i32, Vec<String>, Vec<String>) {
        let mut score = 7;
        let mut issues = Vec::new();
        let mut strengths = Vec::new();

        for alert in &trade.behavioral_flags {
            score -= severity_penalty(alert.severity);
            issues.push(alert.message.clone());
        }

        match trade.planned_risk_reward() {
            Some(rr) if rr >= 2.0 => {
                score += 1;
                strengths.push(format!("Reward to risk of {:.2}", rr));
            }
            Some(rr) => strengths.push(format!("Defined plan with reward to risk of {:.2}", rr)),
            None => {}
        }

        if trade.stop_loss.is_some() {
            strengths.push("Stop-loss in place".to_string());
        }

        (score, issues, strengths)
    }
}

#[async_trait]
impl TradeScorer for HeuristicScorer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn score_pre_trade(&self, trade: &Trade) -> Result<TradeScore, ScoringError> {
        let (score, issues, strengths) = Self::base_score(trade);
        let score = clamp_score(score);

        let suggestion = if trade.stop_loss.is_none() {
            "Place a stop-loss before the position moves against you".to_string()
        } else if issues.is_empty() {
            "Manage the trade according to plan".to_string()
        } else {
            "Review the flagged issues before adding exposure".to_string()
        };

        Ok(TradeScore {
            score,
            confidence: 0.6,
            summary: format!(
                "{} {} scored {}/10 with {} behavioral flag(s)",
                trade.direction,
                trade.symbol,
                score,
                trade.behavioral_flags.len()
            ),
            issues,
            strengths,
            suggestion,
            market_alignment: "unknown".to_string(),
            risk_assessment: match trade.stop_loss {
                Some(_) => "defined".to_string(),
                None => "unlimited".to_string(),
            },
            fallback: false,
        })
    }

    async fn score_modification(
        &self,
        trade: &Trade,
        change: &LevelChange,
        prior: Option<&Assessment>,
    ) -> Result<TradeScore, ScoringError> {
        let (mut score, mut issues, mut strengths) = Self::base_score(trade);

        if change.old_stop_loss.is_some() && change.new_stop_loss.is_none() {
            score -= 3;
            issues.push("Stop-loss removed from an open position".to_string());
        } else {
            match change.stop_shift(trade) {
                Some(shift) if shift > 0.0 => {
                    score += 1;
                    strengths.push("Stop-loss tightened to protect the position".to_string());
                }
                Some(shift) if shift < 0.0 => {
                    score -= 2;
                    issues.push("Stop-loss widened after entry".to_string());
                }
                _ => {}
            }
        }

        let score = clamp_score(score);
        let summary = match prior {
            Some(prior) => format!(
                "Levels changed: score moved from {}/10 to {}/10",
                prior.current().score,
                score
            ),
            None => format!("Levels changed: scored {}/10", score),
        };

        Ok(TradeScore {
            score,
            confidence: 0.5,
            summary,
            issues,
            strengths,
            suggestion: "Keep adjustments consistent with the original plan".to_string(),
            market_alignment: "unknown".to_string(),
            risk_assessment: match trade.stop_loss {
                Some(_) => "defined".to_string(),
                None => "unlimited".to_string(),
            },
            fallback: false,
        })
    }

    async fn review_closed(&self, trade: &Trade) -> Result<TradeReview, ScoringError> {
        let pnl_r = trade.pnl_r;
        let mut execution = match pnl_r {
            Some(r) if r >= 1.0 => 8,
            Some(r) if r > 0.0 => 6,
            Some(r) if r >= -1.05 => 5,
            Some(_) => 3,
            None if trade.is_winner() => 6,
            None => 4,
        };
        execution -= trade
            .behavioral_flags
            .iter()
            .filter(|a| a.severity >= Severity::High)
            .count() as i32;

        let stop_respected = pnl_r.map(|r| r >= -1.05).unwrap_or(trade.stop_loss.is_some());

        let mut what_went_well = Vec::new();
        let mut what_to_improve = Vec::new();
        let mut lessons = Vec::new();

        if trade.is_winner() {
            what_went_well.push("Closed in profit".to_string());
        }
        if stop_respected {
            what_went_well.push("Loss stayed within the planned risk".to_string());
        } else {
            what_to_improve.push("Loss exceeded the planned stop distance".to_string());
            lessons.push("Honour the stop-loss placed at entry".to_string());
        }
        for alert in &trade.behavioral_flags {
            what_to_improve.push(alert.message.clone());
        }

        Ok(TradeReview {
            execution_score: clamp_score(execution),
            plan_adherence: if stop_respected { "followed" } else { "deviated" }.to_string(),
            summary: format!(
                "{} {} closed with P&L {:.2}",
                trade.direction,
                trade.symbol,
                trade.pnl.unwrap_or(0.0)
            ),
            lessons,
            what_went_well,
            what_to_improve,
            emotional_assessment: if trade.behavioral_flags.is_empty() {
                "calm".to_string()
            } else {
                "reactive".to_string()
            },
            fallback: false,
        })
    }
}

/// Score stored when the scorer is unavailable
pub fn fallback_score(trade: &Trade) -> TradeScore {
    let flags = trade.behavioral_flags.len() as i32;
    TradeScore {
        score: clamp_score(5 - flags),
        confidence: 0.3,
        summary: "Automatic analysis unavailable, score based on behavioral flags".to_string(),
        issues: trade
            .behavioral_flags
            .iter()
            .map(|a| a.message.clone())
            .collect(),
        strengths: Vec::new(),
        suggestion: "Review the trade manually".to_string(),
        market_alignment: "unknown".to_string(),
        risk_assessment: "unknown".to_string(),
        fallback: true,
    }
}

/// Review stored when the scorer is unavailable
pub fn fallback_review(trade: &Trade) -> TradeReview {
    TradeReview {
        execution_score: if trade.is_winner() { 6 } else { 4 },
        plan_adherence: "unknown".to_string(),
        summary: "Automatic review unavailable".to_string(),
        lessons: Vec::new(),
        what_went_well: Vec::new(),
        what_to_improve: Vec::new(),
        emotional_assessment: "unknown".to_string(),
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::behavioral_alert::BehavioralAlert;
    use crate::domain::entities::trade::test_support::open_trade;
    use crate::domain::entities::trade::Direction;

    #[test]
    fn test_fallback_score_counts_flags() {
        let mut trade = open_trade("t1", "p1", "EURUSD", Direction::Buy);
        assert_eq!(fallback_score(&trade).score, 5);

        for _ in 0..6 {
            trade
                .behavioral_flags
                .push(BehavioralAlert::new("x", Severity::Low, "flag"));
        }
        let score = fallback_score(&trade);
        assert_eq!(score.score, 1);
        assert_eq!(score.confidence, 0.3);
        assert!(score.fallback);
    }

    #[tokio::test]
    async fn test_heuristic_penalizes_flags() {
        let scorer = HeuristicScorer::new();
        let clean = open_trade("t1", "p1", "EURUSD", Direction::Buy);
        let clean_score = scorer.score_pre_trade(&clean).await.unwrap();

        let mut flagged = clean.clone();
        flagged
            .behavioral_flags
            .push(BehavioralAlert::new("revenge_trading", Severity::High, "Revenge"));
        let flagged_score = scorer.score_pre_trade(&flagged).await.unwrap();

        assert!(flagged_score.score < clean_score.score);
        assert_eq!(flagged_score.issues, vec!["Revenge".to_string()]);
    }

    #[tokio::test]
    async fn test_modification_rewards_tightened_stop() {
        let scorer = HeuristicScorer::new();
        let trade = open_trade("t1", "p1", "EURUSD", Direction::Buy);
        let tightened = LevelChange {
            old_stop_loss: Some(1.082),
            old_take_profit: Some(1.092),
            new_stop_loss: Some(1.085),
            new_take_profit: Some(1.092),
        };
        let widened = LevelChange {
            new_stop_loss: Some(1.079),
            ..tightened.clone()
        };

        let up = scorer.score_modification(&trade, &tightened, None).await.unwrap();
        let down = scorer.score_modification(&trade, &widened, None).await.unwrap();
        assert!(up.score > down.score);
    }

    #[tokio::test]
    async fn test_review_flags_blown_stop() {
        let scorer = HeuristicScorer::new();
        let mut trade = open_trade("t1", "p1", "EURUSD", Direction::Buy);
        trade.pnl = Some(-90.0);
        trade.pnl_r = Some(-3.0);
        let review = scorer.review_closed(&trade).await.unwrap();
        assert_eq!(review.plan_adherence, "deviated");
        assert_eq!(review.execution_score, 3);
    }
}
