//! Trading Strategies Module
//!
//! Each strategy is pure decision logic over candles and position state; the traders in
//! [`crate::trader`] own the exchange calls.
//!
//! - [`rsi_threshold`]: single-position RSI rules of the polling bot
//! - [`grid_trend`]: multi-indicator grid rules of the streaming bot

pub mod grid_trend;
pub mod rsi_threshold;

pub use grid_trend::{GridTrade, GridTrendConfig, GridTrendStrategy, IndicatorSnapshot};
pub use rsi_threshold::{RsiThresholdConfig, RsiThresholdStrategy};
