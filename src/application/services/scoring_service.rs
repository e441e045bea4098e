//! Scoring with retries and a local fallback
//!
//! Scoring never fails from the pipeline's point of view: each call is
//! retried with backoff under a per-attempt timeout, and when the scorer is
//! still unavailable the deterministic fallback is returned instead.

use crate::domain::entities::trade::Trade;
use crate::domain::services::scoring::{fallback_review, fallback_score, LevelChange, TradeScorer};
use crate::domain::value_objects::assessment::{Assessment, TradeReview, TradeScore};
use crate::task_runner::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct ScoringService {
    scorer: Arc<dyn TradeScorer>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl ScoringService {
    pub fn new(scorer: Arc<dyn TradeScorer>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            scorer,
            policy,
            attempt_timeout,
        }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub async fn pre_trade(&self, trade: &Trade) -> TradeScore {
        let label = format!("pre-trade score of {}", trade.id);
        match retry_with_backoff(&label, &self.policy, self.attempt_timeout, || {
            self.scorer.score_pre_trade(trade)
        })
        .await
        {
            Ok(score) => score,
            Err(e) => {
                warn!(
                    "Scorer {} unavailable for trade {}, using fallback: {}",
                    self.scorer.name(),
                    trade.id,
                    e
                );
                fallback_score(trade)
            }
        }
    }

    pub async fn modification(
        &self,
        trade: &Trade,
        change: &LevelChange,
        prior: Option<&Assessment>,
    ) -> TradeScore {
        let label = format!("re-score of {}", trade.id);
        match retry_with_backoff(&label, &self.policy, self.attempt_timeout, || {
            self.scorer.score_modification(trade, change, prior)
        })
        .await
        {
            Ok(score) => score,
            Err(e) => {
                warn!(
                    "Scorer {} unavailable for modified trade {}, using fallback: {}",
                    self.scorer.name(),
                    trade.id,
                    e
                );
                fallback_score(trade)
            }
        }
    }

    pub async fn review(&self, trade: &Trade) -> TradeReview {
        let label = format!("review of {}", trade.id);
        match retry_with_backoff(&label, &self.policy, self.attempt_timeout, || {
            self.scorer.review_closed(trade)
        })
        .await
        {
            Ok(review) => review,
            Err(e) => {
                warn!(
                    "Scorer {} unavailable for closed trade {}, using fallback: {}",
                    self.scorer.name(),
                    trade.id,
                    e
                );
                fallback_review(trade)
            }
        }
    }
}
