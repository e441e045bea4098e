//! Broker position snapshot
//!
//! A snapshot is the provider's view of the open positions on one account at
//! one instant. It is transient: the pipeline diffs consecutive snapshots and
//! never stores them as-is.

use crate::domain::entities::trade::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One open position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub open_price: f64,
    pub current_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub volume: f64,
    pub open_time: Option<DateTime<Utc>>,
    /// Floating profit reported by the broker
    pub profit: Option<f64>,
}

impl Position {
    /// True when the protective levels differ from `other`
    pub fn levels_changed(&self, other: &Position) -> bool {
        self.stop_loss != other.stop_loss || self.take_profit != other.take_profit
    }
}

/// Open positions keyed by broker position id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionSnapshot {
    positions: BTreeMap<String, Position>,
}

impl PositionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn insert(&mut self, position: Position) {
        self.positions.insert(position.id.clone(), position);
    }

    pub fn remove(&mut self, id: &str) -> Option<Position> {
        self.positions.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.positions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl FromIterator<Position> for PositionSnapshot {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        let mut snapshot = PositionSnapshot::new();
        for position in iter {
            // Positions without an id cannot be tracked across passes
            if !position.id.is_empty() {
                snapshot.insert(position);
            }
        }
        snapshot
    }
}

/// Authoritative close information from the broker's deal history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingDeal {
    pub position_id: String,
    pub price: f64,
    /// Net result: profit plus commission plus swap
    pub profit: f64,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: &str) -> Position {
        Position {
            id: id.to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            open_price: 1.085,
            current_price: Some(1.086),
            stop_loss: Some(1.082),
            take_profit: None,
            volume: 0.1,
            open_time: None,
            profit: Some(1.0),
        }
    }

    #[test]
    fn test_snapshot_skips_positions_without_id() {
        let snapshot: PositionSnapshot = vec![position("1"), position(""), position("2")]
            .into_iter()
            .collect();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("1"));
        assert!(!snapshot.contains(""));
    }

    #[test]
    fn test_levels_changed() {
        let a = position("1");
        let mut b = a.clone();
        b.current_price = Some(1.09);
        assert!(!a.levels_changed(&b));
        b.take_profit = Some(1.095);
        assert!(a.levels_changed(&b));
    }
}
