//! Grid Trend Configuration

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTrendConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Long entries need RSI below this; shorts exit on it (default: 30)
    #[serde(default = "default_rsi_buy")]
    pub rsi_buy: f64,

    /// Short entries need RSI above this; longs exit on it (default: 70)
    #[serde(default = "default_rsi_sell")]
    pub rsi_sell: f64,

    #[serde(default = "default_bb_period")]
    pub bb_period: usize,

    /// Band width in standard deviations (default: 2.0)
    #[serde(default = "default_bb_std")]
    pub bb_std: f64,

    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,

    #[serde(default = "default_ema_period")]
    pub ema_period: usize,

    #[serde(default = "default_sma_period")]
    pub sma_period: usize,

    /// Only trade with the trend (EMA above SMA for longs)
    #[serde(default)]
    pub trend_filter: bool,

    /// Maximum concurrently open grid trades (default: 3)
    #[serde(default = "default_max_grid_trades")]
    pub max_grid_trades: usize,

    /// Minimum distance between entries of the same direction, in ATRs (default: 1.0)
    #[serde(default = "default_grid_spacing_atr")]
    pub grid_spacing_atr: f64,

    /// Initial stop distance in ATRs (default: 2.0)
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: f64,

    /// Target distance in ATRs (default: 3.0)
    #[serde(default = "default_take_profit_atr_mult")]
    pub take_profit_atr_mult: f64,

    /// Trailing stop distance in ATRs at entry (default: 1.5)
    #[serde(default = "default_trailing_atr_mult")]
    pub trailing_atr_mult: f64,

    /// Fraction of equity risked per trade (default: 0.01 = 1%)
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,

    /// Allow short entries, sold from held base inventory
    #[serde(default)]
    pub allow_short: bool,
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_buy() -> f64 {
    30.0
}

fn default_rsi_sell() -> f64 {
    70.0
}

fn default_bb_period() -> usize {
    20
}

fn default_bb_std() -> f64 {
    2.0
}

fn default_atr_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_ema_period() -> usize {
    20
}

fn default_sma_period() -> usize {
    50
}

fn default_max_grid_trades() -> usize {
    3
}

fn default_grid_spacing_atr() -> f64 {
    1.0
}

fn default_stop_atr_mult() -> f64 {
    2.0
}

fn default_take_profit_atr_mult() -> f64 {
    3.0
}

fn default_trailing_atr_mult() -> f64 {
    1.5
}

fn default_risk_per_trade() -> f64 {
    0.01
}

impl Default for GridTrendConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_buy: default_rsi_buy(),
            rsi_sell: default_rsi_sell(),
            bb_period: default_bb_period(),
            bb_std: default_bb_std(),
            atr_period: default_atr_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            ema_period: default_ema_period(),
            sma_period: default_sma_period(),
            trend_filter: false,
            max_grid_trades: default_max_grid_trades(),
            grid_spacing_atr: default_grid_spacing_atr(),
            stop_atr_mult: default_stop_atr_mult(),
            take_profit_atr_mult: default_take_profit_atr_mult(),
            trailing_atr_mult: default_trailing_atr_mult(),
            risk_per_trade: default_risk_per_trade(),
            allow_short: false,
        }
    }
}

impl GridTrendConfig {
    /// Candles needed before every indicator reports a value
    pub fn min_candles(&self) -> usize {
        let macd = self.macd_slow + self.macd_signal.saturating_sub(1);
        [
            self.rsi_period + 1,
            self.bb_period,
            self.atr_period,
            // previous bar's MACD is needed for crossovers
            macd + 1,
            self.ema_period,
            self.sma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.rsi_period > 0
                && self.bb_period > 0
                && self.atr_period > 0
                && self.ema_period > 0
                && self.sma_period > 0,
            "indicator periods must be positive"
        );
        ensure!(
            self.macd_fast > 0 && self.macd_fast < self.macd_slow && self.macd_signal > 0,
            "MACD periods must satisfy 0 < fast < slow and signal > 0"
        );
        ensure!(
            self.rsi_buy < self.rsi_sell,
            "rsi_buy ({}) must be below rsi_sell ({})",
            self.rsi_buy,
            self.rsi_sell
        );
        ensure!(self.bb_std > 0.0, "bb_std must be positive");
        ensure!(self.max_grid_trades > 0, "max_grid_trades must be positive");
        ensure!(
            self.grid_spacing_atr >= 0.0,
            "grid_spacing_atr cannot be negative"
        );
        ensure!(
            self.stop_atr_mult > 0.0
                && self.take_profit_atr_mult > 0.0
                && self.trailing_atr_mult > 0.0,
            "ATR multipliers must be positive"
        );
        ensure!(
            self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0,
            "risk_per_trade must be within (0, 1]"
        );
        Ok(())
    }
}
