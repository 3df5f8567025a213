//! Trading loops
//!
//! - [`PollingTrader`]: fetches the latest candle on a fixed interval and runs the RSI
//!   threshold rules on a single position
//! - [`StreamingTrader`]: consumes live kline events and manages a grid of trades
//!
//! Both hold their position state in memory and record closed round trips in a
//! [`TradeLedger`].

pub mod ledger;
pub mod polling;
pub mod streaming;

pub use ledger::{TradeLedger, TradeSummary};
pub use polling::{PollingTrader, StepOutcome};
pub use streaming::{EventOutcome, StreamingTrader};
