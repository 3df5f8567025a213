//! Grid Trend Strategy
//!
//! Mean-reversion entries confirmed by momentum, stacked into a small grid.
//!
//! ## Entries (evaluated once per tick, at most one per candle)
//! - Long: RSI below `rsi_buy` and price at/below the lower Bollinger band or MACD
//!   crossing above its signal line; with `trend_filter`, EMA must be above SMA
//! - Short (`allow_short` only): the mirror image
//! - At most `max_grid_trades` open, each new entry `grid_spacing_atr` ATRs away from
//!   every open entry of the same direction
//!
//! ## Exits (per trade)
//! - Stop: initial stop at `stop_atr_mult` ATRs, trailing stop `trailing_atr_mult` ATRs
//!   behind the best price once the trade is in profit
//! - Target: `take_profit_atr_mult` ATRs from entry
//! - Signal: RSI crossing to the opposite extreme

use chrono::{DateTime, Utc};

use super::config::GridTrendConfig;
use crate::indicators::{bollinger_bands, ema, last_value, macd, range_atr, rsi, sma};
use crate::position::OpenPosition;
use crate::types::{Candle, Direction, ExitReason};

/// Indicator values of the latest candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub prev_macd: f64,
    pub prev_macd_signal: f64,
    pub ema: f64,
    pub sma: f64,
}

impl IndicatorSnapshot {
    /// `None` until every indicator has warmed up
    pub fn compute(candles: &[Candle], config: &GridTrendConfig) -> Option<Self> {
        let n = candles.len();
        if n < 2 {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let (upper, middle, lower) = bollinger_bands(&closes, config.bb_period, config.bb_std);
        let (macd_line, signal_line, _) = macd(
            &closes,
            config.macd_fast,
            config.macd_slow,
            config.macd_signal,
        );

        Some(IndicatorSnapshot {
            close: closes[n - 1],
            rsi: last_value(&rsi(&closes, config.rsi_period))?,
            bb_upper: last_value(&upper)?,
            bb_middle: last_value(&middle)?,
            bb_lower: last_value(&lower)?,
            atr: last_value(&range_atr(&highs, &lows, config.atr_period))?,
            macd: (*macd_line.get(n - 1)?)?,
            macd_signal: (*signal_line.get(n - 1)?)?,
            prev_macd: (*macd_line.get(n - 2)?)?,
            prev_macd_signal: (*signal_line.get(n - 2)?)?,
            ema: last_value(&ema(&closes, config.ema_period))?,
            sma: last_value(&sma(&closes, config.sma_period))?,
        })
    }

    pub fn macd_crossed_up(&self) -> bool {
        self.prev_macd <= self.prev_macd_signal && self.macd > self.macd_signal
    }

    pub fn macd_crossed_down(&self) -> bool {
        self.prev_macd >= self.prev_macd_signal && self.macd < self.macd_signal
    }
}

/// One open trade of the grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridTrade {
    pub id: u64,
    pub position: OpenPosition,
    /// Fixed at entry from the ATR of that bar
    pub trailing_distance: f64,
}

#[derive(Debug, Clone)]
pub struct GridTrendStrategy {
    config: GridTrendConfig,
}

impl GridTrendStrategy {
    pub fn new(config: GridTrendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GridTrendConfig {
        &self.config
    }

    pub fn snapshot(&self, candles: &[Candle]) -> Option<IndicatorSnapshot> {
        IndicatorSnapshot::compute(candles, &self.config)
    }

    pub fn entry_signal(&self, snap: &IndicatorSnapshot) -> Option<Direction> {
        let long = snap.rsi < self.config.rsi_buy
            && (snap.close <= snap.bb_lower || snap.macd_crossed_up())
            && (!self.config.trend_filter || snap.ema > snap.sma);
        if long {
            return Some(Direction::Long);
        }

        let short = self.config.allow_short
            && snap.rsi > self.config.rsi_sell
            && (snap.close >= snap.bb_upper || snap.macd_crossed_down())
            && (!self.config.trend_filter || snap.ema < snap.sma);
        short.then_some(Direction::Short)
    }

    /// Grid capacity and spacing check for a new entry at `price`
    pub fn can_add(&self, direction: Direction, price: f64, atr: f64, open: &[GridTrade]) -> bool {
        if atr <= 0.0 || open.len() >= self.config.max_grid_trades {
            return false;
        }
        let min_gap = self.config.grid_spacing_atr * atr;
        open.iter()
            .filter(|t| t.position.direction == direction)
            .all(|t| (t.position.entry_price - price).abs() >= min_gap)
    }

    /// Initial (stop, target) for an entry
    pub fn initial_levels(&self, direction: Direction, entry: f64, atr: f64) -> (f64, f64) {
        let stop = self.config.stop_atr_mult * atr;
        let target = self.config.take_profit_atr_mult * atr;
        match direction {
            Direction::Long => (entry - stop, entry + target),
            Direction::Short => (entry + stop, entry - target),
        }
    }

    pub fn open_trade(
        &self,
        id: u64,
        direction: Direction,
        entry: f64,
        quantity: f64,
        atr: f64,
        time: DateTime<Utc>,
    ) -> GridTrade {
        let (stop, target) = self.initial_levels(direction, entry, atr);
        GridTrade {
            id,
            position: OpenPosition::new(direction, entry, quantity, time, stop, target),
            trailing_distance: self.config.trailing_atr_mult * atr,
        }
    }

    /// Ratchet the trailing stop; it arms once the trade is in profit
    pub fn update_trailing(&self, trade: &mut GridTrade, price: f64) -> Option<f64> {
        let position = &mut trade.position;
        if position.trailing_stop.is_none() && position.unrealized_pnl(price) <= 0.0 {
            return None;
        }
        position.update_trailing(price, trade.trailing_distance)
    }

    pub fn exit_reason(&self, trade: &GridTrade, snap: &IndicatorSnapshot) -> Option<ExitReason> {
        let position = &trade.position;
        let price = snap.close;

        if position.hit_stop(price) {
            return Some(if position.trailing_active() {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            });
        }
        if position.hit_target(price) {
            return Some(ExitReason::TakeProfit);
        }

        let reversed = match position.direction {
            Direction::Long => snap.rsi > self.config.rsi_sell,
            Direction::Short => snap.rsi < self.config.rsi_buy,
        };
        reversed.then_some(ExitReason::Signal)
    }

    /// Share of `available` one more grid trade may use
    pub fn slot_budget(&self, available: f64, open_trades: usize) -> f64 {
        let remaining = self.config.max_grid_trades.saturating_sub(open_trades);
        if remaining == 0 {
            return 0.0;
        }
        available.max(0.0) / remaining as f64
    }

    /// Quantity risking `risk_per_trade` of `equity` over the stop distance,
    /// capped at `max_quantity` and reduced by the fee
    pub fn position_size(
        &self,
        entry: f64,
        stop: f64,
        equity: f64,
        max_quantity: f64,
        fee: f64,
    ) -> f64 {
        let stop_distance = (entry - stop).abs();
        if stop_distance == 0.0 || equity <= 0.0 || max_quantity <= 0.0 {
            return 0.0;
        }
        let risk_quantity = equity * self.config.risk_per_trade / stop_distance;
        risk_quantity.min(max_quantity) * (1.0 - fee)
    }
}
