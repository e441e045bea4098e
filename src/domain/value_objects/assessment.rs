//! Scoring results attached to trades.
//!
//! A modification re-score keeps the thesis it replaced: [`Assessment::Revised`]
//! wraps the prior assessment instead of merging into it.

use serde::{Deserialize, Serialize};

/// Pre-trade or modification score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeScore {
    /// 1 (poor) to 10 (excellent)
    pub score: u8,
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    pub suggestion: String,
    pub market_alignment: String,
    pub risk_assessment: String,
    /// True when produced by the local fallback instead of the scorer
    #[serde(default)]
    pub fallback: bool,
}

/// Post-trade review written after a close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReview {
    pub execution_score: u8,
    pub plan_adherence: String,
    pub summary: String,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default)]
    pub what_went_well: Vec<String>,
    #[serde(default)]
    pub what_to_improve: Vec<String>,
    pub emotional_assessment: String,
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assessment {
    Standalone {
        score: TradeScore,
    },
    Revised {
        score: TradeScore,
        prior: Box<Assessment>,
    },
}

impl Assessment {
    pub fn standalone(score: TradeScore) -> Self {
        Assessment::Standalone { score }
    }

    pub fn revise(score: TradeScore, prior: Assessment) -> Self {
        Assessment::Revised {
            score,
            prior: Box::new(prior),
        }
    }

    /// The most recent score
    pub fn current(&self) -> &TradeScore {
        match self {
            Assessment::Standalone { score } | Assessment::Revised { score, .. } => score,
        }
    }

    /// The original pre-trade thesis at the bottom of the revision chain
    pub fn open_thesis(&self) -> &TradeScore {
        let mut node = self;
        while let Assessment::Revised { prior, .. } = node {
            node = prior;
        }
        node.current()
    }

    pub fn is_revised(&self) -> bool {
        matches!(self, Assessment::Revised { .. })
    }

    /// Number of revisions on top of the original score
    pub fn revisions(&self) -> usize {
        let mut count = 0;
        let mut node = self;
        while let Assessment::Revised { prior, .. } = node {
            count += 1;
            node = prior;
        }
        count
    }
}
