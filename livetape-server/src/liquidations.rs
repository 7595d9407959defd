use livetape_data::Liquidation;
use std::collections::VecDeque;

/// Bounded most-recent-first list of liquidations at or above a notional floor.
///
/// Identical reports are retained as distinct events; venues re-deliver legitimately.
#[derive(Clone, Debug)]
pub struct LiquidationFeed {
    items: VecDeque<Liquidation>,
    capacity: usize,
    min_notional: f64,
}

impl LiquidationFeed {
    pub fn new(capacity: usize, min_notional: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
            min_notional,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Retained liquidations, most recent first.
    pub fn to_vec(&self) -> Vec<Liquidation> {
        self.items.iter().cloned().collect()
    }

    /// Retain `liquidation` if its notional meets the floor, evicting the oldest on overflow.
    ///
    /// Returns true if accepted.
    pub fn ingest(&mut self, liquidation: Liquidation) -> bool {
        if liquidation.notional.is_nan() || liquidation.notional < self.min_notional {
            return false;
        }

        self.items.push_front(liquidation);
        self.items.truncate(self.capacity);
        true
    }
}
