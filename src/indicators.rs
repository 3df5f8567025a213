//! Technical indicators
//!
//! Moving averages, Bollinger Bands and MACD are thin wrappers around the `ta` crate.
//! RSI and the range ATR are computed directly because `ta` smooths RSI with a plain
//! EMA and its ATR uses true range, while both bots want Wilder smoothing and the
//! high-low range respectively.
//!
//! Every function returns one value per input with `None` during warm-up.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    SimpleMovingAverage,
};
use ta::Next;

/// Three aligned series, e.g. (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Latest defined value of an indicator series
pub fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Feed `values` through a `ta` indicator, hiding outputs before `ready_at` inputs
fn warmed<I>(mut indicator: I, values: &[f64], ready_at: usize) -> Vec<Option<f64>>
where
    I: Next<f64, Output = f64>,
{
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            (i + 1 >= ready_at).then_some(out)
        })
        .collect()
}

fn empty_bands(len: usize) -> BandOutput {
    (vec![None; len], vec![None; len], vec![None; len])
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    SimpleMovingAverage::new(period)
        .map(|indicator| warmed(indicator, values, period))
        .unwrap_or_else(|_| vec![None; values.len()])
}

/// Exponential Moving Average, seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    ExponentialMovingAverage::new(period)
        .map(|indicator| warmed(indicator, values, period))
        .unwrap_or_else(|_| vec![None; values.len()])
}

// =============================================================================
// Momentum Indicators
// =============================================================================

/// How average gains and losses are smoothed for RSI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiMethod {
    /// Wilder smoothing: avg = (prev * (n - 1) + x) / n
    #[default]
    Wilder,
    /// Plain rolling mean of the last n gains and losses
    Simple,
}

/// RSI with the selected smoothing method
pub fn rsi_with(values: &[f64], period: usize, method: RsiMethod) -> Vec<Option<f64>> {
    match method {
        RsiMethod::Wilder => rsi(values, period),
        RsiMethod::Simple => rsi_simple(values, period),
    }
}

fn gains_and_losses(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    values
        .iter()
        .tuple_windows()
        .map(|(prev, next)| {
            let change = next - prev;
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Wilder-style RSI
///
/// The first average gain/loss is the simple mean of the first `period` price changes,
/// later values use Wilder's smoothing. A flat series reads 50, a series that never
/// falls reads 100.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = vec![None; values.len()];
    if values.len() <= period {
        return result;
    }

    let (gains, losses) = gains_and_losses(values);
    let n = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / n;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / n;
    result[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    // change k lands on bar k + 1
    for k in period..gains.len() {
        avg_gain = (avg_gain * (n - 1.0) + gains[k]) / n;
        avg_loss = (avg_loss * (n - 1.0) + losses[k]) / n;
        result[k + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

/// RSI from plain rolling means of gains and losses
pub fn rsi_simple(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = vec![None; values.len()];
    if values.len() <= period {
        return result;
    }

    let (gains, losses) = gains_and_losses(values);
    let n = period as f64;
    for end in period..=gains.len() {
        let avg_gain = gains[end - period..end].iter().sum::<f64>() / n;
        let avg_loss = losses[end - period..end].iter().sum::<f64>() / n;
        result[end] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

/// MACD line, signal line and histogram
///
/// Values are reported once both the slow EMA and the signal EMA have seen enough data.
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> BandOutput {
    if values.is_empty() {
        return (vec![], vec![], vec![]);
    }
    let Ok(mut indicator) =
        MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period)
    else {
        return empty_bands(values.len());
    };

    let ready_at = slow_period + signal_period.saturating_sub(1);
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            if i + 1 >= ready_at {
                (Some(out.macd), Some(out.signal), Some(out.histogram))
            } else {
                (None, None, None)
            }
        })
        .multiunzip()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Bollinger Bands as (upper, middle, lower), population standard deviation
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }
    let Ok(mut indicator) = BollingerBands::new(period, num_std) else {
        return empty_bands(values.len());
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let bands = indicator.next(value);
            if i + 1 >= period {
                (Some(bands.upper), Some(bands.average), Some(bands.lower))
            } else {
                (None, None, None)
            }
        })
        .multiunzip()
}

/// Average range: rolling mean of `high - low`
pub fn range_atr(high: &[f64], low: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || high.len() != low.len() {
        return vec![];
    }

    let ranges: Vec<f64> = high.iter().zip(low).map(|(h, l)| h - l).collect();
    sma(&ranges, period)
}
