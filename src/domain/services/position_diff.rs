//! Position Diff Engine
//!
//! Compares two consecutive snapshots of the same account. A position id in
//! `current` only is opened, in `previous` only is closed, and in both with a
//! different stop-loss or take-profit is modified. The three sets are
//! disjoint by construction.

use crate::domain::entities::position::{Position, PositionSnapshot};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionDiff {
    pub opened: Vec<Position>,
    /// Last-known state of each vanished position
    pub closed: Vec<Position>,
    /// Current state of each position whose levels changed
    pub modified: Vec<Position>,
}

impl PositionDiff {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.opened.len() + self.closed.len() + self.modified.len()
    }
}

pub fn diff_positions(previous: &PositionSnapshot, current: &PositionSnapshot) -> PositionDiff {
    let mut diff = PositionDiff::default();

    for position in current.iter() {
        match previous.get(&position.id) {
            None => diff.opened.push(position.clone()),
            Some(old) if old.levels_changed(position) => diff.modified.push(position.clone()),
            Some(_) => {}
        }
    }

    for position in previous.iter() {
        if !current.contains(&position.id) {
            diff.closed.push(position.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::trade::Direction;
    use std::collections::HashSet;

    fn position(id: &str, sl: Option<f64>, tp: Option<f64>) -> Position {
        Position {
            id: id.to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            open_price: 1.085,
            current_price: Some(1.0855),
            stop_loss: sl,
            take_profit: tp,
            volume: 0.1,
            open_time: None,
            profit: Some(0.5),
        }
    }

    fn snapshot(positions: Vec<Position>) -> PositionSnapshot {
        positions.into_iter().collect()
    }

    #[test]
    fn test_detects_open_close_and_modify() {
        let previous = snapshot(vec![
            position("a", Some(1.08), None),
            position("b", Some(1.08), Some(1.09)),
        ]);
        let current = snapshot(vec![
            position("b", Some(1.083), Some(1.09)),
            position("c", None, None),
        ]);

        let diff = diff_positions(&previous, &current);
        assert_eq!(diff.opened.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(diff.closed.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(diff.modified.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(diff.modified[0].stop_loss, Some(1.083));
    }

    #[test]
    fn test_price_only_changes_are_ignored() {
        let previous = snapshot(vec![position("a", Some(1.08), None)]);
        let mut moved = position("a", Some(1.08), None);
        moved.current_price = Some(1.1);
        moved.profit = Some(150.0);
        let current = snapshot(vec![moved]);

        assert!(diff_positions(&previous, &current).is_empty());
    }

    #[test]
    fn test_first_pass_opens_everything() {
        let current = snapshot(vec![position("a", None, None), position("b", None, None)]);
        let diff = diff_positions(&PositionSnapshot::new(), &current);
        assert_eq!(diff.opened.len(), 2);
        assert!(diff.closed.is_empty());
    }

    #[test]
    fn test_sets_are_disjoint_and_bounded_by_inputs() {
        let levels = [None, Some(1.08), Some(1.081)];
        // Walk a deterministic sequence of snapshots built from overlapping id ranges
        let mut snapshots = Vec::new();
        for step in 0..12usize {
            let ids = (step % 4)..(step % 4 + 3);
            let positions = ids
                .map(|i| {
                    let sl = levels[(i + step) % levels.len()];
                    position(&format!("p{}", i), sl, None)
                })
                .collect::<Vec<_>>();
            snapshots.push(snapshot(positions));
        }

        for pair in snapshots.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            let diff = diff_positions(previous, current);

            let opened: HashSet<_> = diff.opened.iter().map(|p| p.id.clone()).collect();
            let closed: HashSet<_> = diff.closed.iter().map(|p| p.id.clone()).collect();
            let modified: HashSet<_> = diff.modified.iter().map(|p| p.id.clone()).collect();

            assert!(opened.is_disjoint(&closed));
            assert!(opened.is_disjoint(&modified));
            assert!(closed.is_disjoint(&modified));

            let inputs: HashSet<_> = previous.ids().chain(current.ids()).cloned().collect();
            for id in opened.iter().chain(&closed).chain(&modified) {
                assert!(inputs.contains(id));
            }
        }
    }
}
