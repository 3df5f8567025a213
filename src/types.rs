//! Core data types used across both bots

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Errors raised while parsing a `BASE/QUOTE` symbol
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolParseError {
    #[error("symbol '{0}' must look like BASE/QUOTE")]
    MissingSeparator(String),

    #[error("symbol '{0}' has an empty base or quote asset")]
    EmptyAsset(String),
}

/// Trading pair symbol, e.g. `ETH/USDC`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Symbol {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Exchange pair form without separator (`ETHUSDC`)
    pub fn pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| SymbolParseError::MissingSeparator(s.to_string()))?;
        if base.trim().is_empty() || quote.trim().is_empty() {
            return Err(SymbolParseError::EmptyAsset(s.to_string()));
        }
        Ok(Symbol::new(base.trim(), quote.trim()))
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens a position in this direction
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Order side that closes a position in this direction
    pub fn exit_side(&self) -> Side {
        match self {
            Direction::Long => Side::Sell,
            Direction::Short => Side::Buy,
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    TakeProfit,
    StopLoss,
    TrailingStop,
    Shutdown,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExitReason::Signal => "SIGNAL",
            ExitReason::TakeProfit => "TAKE PROFIT",
            ExitReason::StopLoss => "STOP LOSS",
            ExitReason::TrailingStop => "TRAILING STOP",
            ExitReason::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub reason: ExitReason,
}

impl Trade {
    pub fn return_pct(&self) -> f64 {
        let raw = ((self.exit_price - self.entry_price) / self.entry_price) * 100.0;
        match self.direction {
            Direction::Long => raw,
            Direction::Short => -raw,
        }
    }
}

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    /// Last traded price seen by the caller; simulated fills use it
    pub reference_price: f64,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, quantity: Decimal, reference_price: f64) -> Self {
        OrderRequest {
            symbol,
            side,
            quantity,
            reference_price,
            client_order_id: next_client_order_id(),
        }
    }
}

fn next_client_order_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("kt-{}-{}", Utc::now().timestamp_millis(), seq)
}

/// Exchange acknowledgement of a filled (or partially filled) market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub client_order_id: String,
    pub side: Side,
    pub status: String,
    pub executed_qty: f64,
    /// Volume-weighted fill price, 0 when nothing filled
    pub avg_price: f64,
    pub commission: f64,
    pub commission_asset: Option<String>,
}

impl OrderReceipt {
    /// Fill price, falling back to `reference` when the exchange did not report one
    pub fn fill_price_or(&self, reference: f64) -> f64 {
        if self.avg_price > 0.0 {
            self.avg_price
        } else {
            reference
        }
    }

    /// Base quantity actually received/delivered once a base-asset commission is removed
    pub fn net_base_quantity(&self, base_asset: &str) -> f64 {
        match (&self.commission_asset, self.side) {
            (Some(asset), Side::Buy) if asset.eq_ignore_ascii_case(base_asset) => {
                (self.executed_qty - self.commission).max(0.0)
            }
            _ => self.executed_qty,
        }
    }
}

/// Balance of a single asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: f64,
    pub locked: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Account balances keyed by upper-case asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    assets: HashMap<String, AssetBalance>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, asset: &str, free: f64) -> Self {
        self.set(asset, AssetBalance { free, locked: 0.0 });
        self
    }

    pub fn set(&mut self, asset: &str, balance: AssetBalance) {
        self.assets.insert(asset.to_uppercase(), balance);
    }

    pub fn get(&self, asset: &str) -> AssetBalance {
        self.assets
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or_default()
    }

    /// Free plus locked amount, 0 for an asset the account never held
    pub fn total(&self, asset: &str) -> f64 {
        self.get(asset).total()
    }

    pub fn free(&self, asset: &str) -> f64 {
        self.get(asset).free
    }
}

/// Quantity and notional filters of a trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRules {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: f64,
}

impl Default for MarketRules {
    fn default() -> Self {
        MarketRules {
            step_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
            min_notional: 0.0,
        }
    }
}

impl MarketRules {
    /// Floor `quantity` to the lot step; `None` when the result is not tradable
    pub fn round_quantity(&self, quantity: f64, price: f64) -> Option<Decimal> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return None;
        }
        let raw = Decimal::from_f64(quantity)?;
        let rounded = if self.step_size > Decimal::ZERO {
            (raw / self.step_size).floor() * self.step_size
        } else {
            raw.round_dp_with_strategy(8, RoundingStrategy::ToZero)
        };

        if rounded <= Decimal::ZERO || rounded < self.min_qty {
            return None;
        }
        let notional = rounded.to_f64()? * price;
        if notional < self.min_notional {
            return None;
        }
        Some(rounded.normalize())
    }
}
