//! Grid Trend Strategy
//!
//! Rule set of the streaming bot: up to a few concurrent trades entered on RSI extremes
//! confirmed by Bollinger Bands or a MACD crossover, with ATR-scaled stops, targets and
//! trailing stops.

mod config;
mod strategy;

pub use config::GridTrendConfig;
pub use strategy::{GridTrade, GridTrendStrategy, IndicatorSnapshot};
