//! RSI Threshold Configuration

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::indicators::RsiMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiThresholdConfig {
    /// RSI lookback (default: 14)
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Buy when RSI drops below this (default: 31)
    #[serde(default = "default_buy_threshold")]
    pub rsi_buy_threshold: f64,

    /// Sell when RSI rises above this (default: 60)
    #[serde(default = "default_sell_threshold")]
    pub rsi_sell_threshold: f64,

    /// Take profit as a fraction of entry (e.g., 0.04 = 4%)
    #[serde(default = "default_take_profit")]
    pub take_profit: f64,

    /// Stop loss as a fraction of entry (e.g., 0.01 = 1%)
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,

    #[serde(default)]
    pub rsi_method: RsiMethod,
}

fn default_rsi_period() -> usize {
    14
}

fn default_buy_threshold() -> f64 {
    31.0
}

fn default_sell_threshold() -> f64 {
    60.0
}

fn default_take_profit() -> f64 {
    0.04
}

fn default_stop_loss() -> f64 {
    0.01
}

impl Default for RsiThresholdConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_buy_threshold: default_buy_threshold(),
            rsi_sell_threshold: default_sell_threshold(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            rsi_method: RsiMethod::default(),
        }
    }
}

impl RsiThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.rsi_period > 0, "rsi_period must be positive");
        ensure!(
            (0.0..=100.0).contains(&self.rsi_buy_threshold)
                && (0.0..=100.0).contains(&self.rsi_sell_threshold),
            "RSI thresholds must lie within 0..=100"
        );
        ensure!(
            self.rsi_buy_threshold < self.rsi_sell_threshold,
            "rsi_buy_threshold ({}) must be below rsi_sell_threshold ({})",
            self.rsi_buy_threshold,
            self.rsi_sell_threshold
        );
        ensure!(self.take_profit > 0.0, "take_profit must be positive");
        ensure!(
            self.stop_loss > 0.0 && self.stop_loss < 1.0,
            "stop_loss must be within (0, 1)"
        );
        Ok(())
    }
}
