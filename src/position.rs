//! Position state shared by the polling and streaming traders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// An open position with its protective levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_price: f64,
    pub target_price: f64,
    pub trailing_stop: Option<f64>,
    /// Most favourable price seen since entry
    pub best_price: f64,
}

impl OpenPosition {
    pub fn new(
        direction: Direction,
        entry_price: f64,
        quantity: f64,
        entry_time: DateTime<Utc>,
        stop_price: f64,
        target_price: f64,
    ) -> Self {
        OpenPosition {
            direction,
            entry_price,
            quantity,
            entry_time,
            stop_price,
            target_price,
            trailing_stop: None,
            best_price: entry_price,
        }
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.realized_pnl(current_price)
    }

    /// PnL of closing the whole position at `exit_price`, fees excluded
    pub fn realized_pnl(&self, exit_price: f64) -> f64 {
        match self.direction {
            Direction::Long => (exit_price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - exit_price) * self.quantity,
        }
    }

    pub fn hit_target(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price >= self.target_price,
            Direction::Short => price <= self.target_price,
        }
    }

    /// The tighter of the initial stop and the trailing stop
    pub fn effective_stop(&self) -> f64 {
        match (self.direction, self.trailing_stop) {
            (Direction::Long, Some(trail)) => self.stop_price.max(trail),
            (Direction::Short, Some(trail)) => self.stop_price.min(trail),
            (_, None) => self.stop_price,
        }
    }

    /// Whether the trailing stop has moved past the initial stop
    pub fn trailing_active(&self) -> bool {
        self.effective_stop() != self.stop_price
    }

    pub fn hit_stop(&self, price: f64) -> bool {
        let stop = self.effective_stop();
        match self.direction {
            Direction::Long => price <= stop,
            Direction::Short => price >= stop,
        }
    }

    /// Track the best price and ratchet the trailing stop `distance` behind it.
    ///
    /// Returns the new trailing stop when it moved.
    pub fn update_trailing(&mut self, price: f64, distance: f64) -> Option<f64> {
        if distance <= 0.0 {
            return None;
        }

        let improved = match self.direction {
            Direction::Long => price > self.best_price,
            Direction::Short => price < self.best_price,
        };
        if improved {
            self.best_price = price;
        }

        let candidate = match self.direction {
            Direction::Long => self.best_price - distance,
            Direction::Short => self.best_price + distance,
        };
        let tighter = match (self.direction, self.trailing_stop) {
            (_, None) => true,
            (Direction::Long, Some(current)) => candidate > current,
            (Direction::Short, Some(current)) => candidate < current,
        };

        if tighter {
            self.trailing_stop = Some(candidate);
            Some(candidate)
        } else {
            None
        }
    }
}

/// Position of a single-position bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PositionState {
    #[default]
    Flat,
    Open(OpenPosition),
}

impl PositionState {
    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    pub fn is_long(&self) -> bool {
        matches!(self, PositionState::Open(p) if p.direction == Direction::Long)
    }

    pub fn is_short(&self) -> bool {
        matches!(self, PositionState::Open(p) if p.direction == Direction::Short)
    }

    pub fn open_position(&self) -> Option<&OpenPosition> {
        match self {
            PositionState::Open(p) => Some(p),
            PositionState::Flat => None,
        }
    }

    /// Take the open position out, leaving the state flat
    pub fn close(&mut self) -> Option<OpenPosition> {
        match std::mem::take(self) {
            PositionState::Open(p) => Some(p),
            PositionState::Flat => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(entry: f64) -> OpenPosition {
        OpenPosition::new(Direction::Long, entry, 2.0, Utc::now(), entry - 2.0, entry + 4.0)
    }

    #[test]
    fn test_long_pnl_and_levels() {
        let pos = long(100.0);
        assert_eq!(pos.unrealized_pnl(110.0), 20.0);
        assert!(pos.hit_target(104.0));
        assert!(!pos.hit_target(103.9));
        assert!(pos.hit_stop(98.0));
        assert!(!pos.hit_stop(98.5));
    }

    #[test]
    fn test_short_pnl_and_levels() {
        let pos = OpenPosition::new(Direction::Short, 100.0, 1.0, Utc::now(), 102.0, 95.0);
        assert_eq!(pos.realized_pnl(90.0), 10.0);
        assert!(pos.hit_target(95.0));
        assert!(pos.hit_stop(102.5));
        assert!(!pos.hit_stop(101.0));
    }

    #[test]
    fn test_trailing_stop_only_ratchets_up_for_long() {
        let mut pos = long(100.0);
        assert_eq!(pos.update_trailing(105.0, 3.0), Some(102.0));
        assert!(pos.trailing_active());
        // pullback does not loosen the stop
        assert_eq!(pos.update_trailing(103.0, 3.0), None);
        assert_eq!(pos.effective_stop(), 102.0);
        assert!(pos.hit_stop(101.9));
    }

    #[test]
    fn test_trailing_below_initial_stop_is_inactive() {
        let mut pos = long(100.0);
        pos.update_trailing(100.0, 5.0);
        assert_eq!(pos.trailing_stop, Some(95.0));
        assert!(!pos.trailing_active());
        assert_eq!(pos.effective_stop(), 98.0);
    }

    #[test]
    fn test_trailing_stop_for_short() {
        let mut pos = OpenPosition::new(Direction::Short, 100.0, 1.0, Utc::now(), 104.0, 90.0);
        assert_eq!(pos.update_trailing(96.0, 2.0), Some(98.0));
        assert_eq!(pos.update_trailing(97.0, 2.0), None);
        assert_eq!(pos.effective_stop(), 98.0);
    }

    #[test]
    fn test_position_state_close() {
        let mut state = PositionState::Open(long(100.0));
        assert!(state.is_long());
        let closed = state.close();
        assert!(closed.is_some());
        assert!(state.is_flat());
        assert!(state.close().is_none());
    }
}
