//! Kline Traders
//!
//! Two single-symbol trading bots for Binance spot markets:
//! - a polling bot that fetches the latest candle on a fixed interval and trades a single
//!   position on RSI thresholds with fixed take-profit and stop-loss levels
//! - a streaming bot that consumes the live kline WebSocket feed and manages a small grid
//!   of trades from RSI, Bollinger Bands, MACD and ATR, with trailing stops
//!
//! Both run against the [`exchange::Exchange`] trait, implemented by the Binance REST
//! client and by a paper-trading wrapper.

pub mod common;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod position;
pub mod strategies;
pub mod trader;
pub mod types;

pub use config::Config;
pub use error::{ExchangeError, ExchangeResult};
pub use position::{OpenPosition, PositionState};
pub use types::*;
