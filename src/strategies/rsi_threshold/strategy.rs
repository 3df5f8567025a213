//! RSI Threshold Strategy
//!
//! Single long position driven by RSI:
//! 1. Flat and RSI below the buy threshold → BUY
//! 2. Long and RSI above the sell threshold → SELL
//! 3. Long and price reaches entry·(1+tp) → take profit, or entry·(1−sl) → stop loss
//!
//! After a stop loss the bot buys straight back in if RSI is still below the buy threshold.

use chrono::{DateTime, Utc};

use super::config::RsiThresholdConfig;
use crate::indicators::{last_value, rsi_with};
use crate::position::{OpenPosition, PositionState};
use crate::types::{Direction, ExitReason};

#[derive(Debug, Clone)]
pub struct RsiThresholdStrategy {
    config: RsiThresholdConfig,
}

impl RsiThresholdStrategy {
    pub fn new(config: RsiThresholdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RsiThresholdConfig {
        &self.config
    }

    /// RSI of the latest close, `None` while the window is too short
    pub fn rsi(&self, closes: &[f64]) -> Option<f64> {
        last_value(&rsi_with(
            closes,
            self.config.rsi_period,
            self.config.rsi_method,
        ))
    }

    pub fn should_enter(&self, position: &PositionState, rsi: f64) -> bool {
        position.is_flat() && rsi < self.config.rsi_buy_threshold
    }

    pub fn signal_exit(&self, position: &PositionState, rsi: f64) -> bool {
        position.is_long() && rsi > self.config.rsi_sell_threshold
    }

    /// Take profit wins over stop loss; both levels are fixed at entry
    pub fn protective_exit(&self, position: &PositionState, price: f64) -> Option<ExitReason> {
        let open = position.open_position()?;
        if open.direction != Direction::Long {
            return None;
        }
        if open.hit_target(price) {
            Some(ExitReason::TakeProfit)
        } else if open.hit_stop(price) {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }

    pub fn open_position(&self, price: f64, quantity: f64, time: DateTime<Utc>) -> OpenPosition {
        OpenPosition::new(
            Direction::Long,
            price,
            quantity,
            time,
            price * (1.0 - self.config.stop_loss),
            price * (1.0 + self.config.take_profit),
        )
    }

    /// Base quantity bought with `trade_amount` of quote, net of the fee
    pub fn order_quantity(&self, trade_amount: f64, price: f64, fee: f64) -> f64 {
        if price <= 0.0 || trade_amount <= 0.0 {
            return 0.0;
        }
        trade_amount / price * (1.0 - fee)
    }
}
