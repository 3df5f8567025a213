//! RSI Threshold Strategy
//!
//! Rule set of the polling bot: buy oversold, sell overbought, with fixed take-profit and
//! stop-loss levels around the entry.

mod config;
mod strategy;

pub use config::RsiThresholdConfig;
pub use strategy::RsiThresholdStrategy;
