//! Binance REST and WebSocket payloads and their conversion into crate types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{AssetBalance, Balances, Candle, MarketRules, OrderReceipt, Side};

fn parse_num(raw: &str, field: &str) -> ExchangeResult<f64> {
    raw.parse()
        .map_err(|_| ExchangeError::Decode(format!("invalid {} '{}'", field, raw)))
}

fn millis_to_datetime(ms: i64) -> ExchangeResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ExchangeError::Decode(format!("invalid timestamp {}", ms)))
}

/// Binance kline/candlestick data
/// API returns an array: [open_time, open, high, low, close, volume, close_time,
///                        quote_volume, trades, taker_buy_base, taker_buy_quote, ignore]
#[derive(Debug, Clone)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl BinanceKline {
    /// Parse from raw JSON array returned by Binance API
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 7 {
            return None;
        }

        Some(BinanceKline {
            open_time: raw[0].as_i64()?,
            open: raw[1].as_str()?.parse().ok()?,
            high: raw[2].as_str()?.parse().ok()?,
            low: raw[3].as_str()?.parse().ok()?,
            close: raw[4].as_str()?.parse().ok()?,
            volume: raw[5].as_str()?.parse().ok()?,
            close_time: raw[6].as_i64()?,
        })
    }

    pub fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            datetime: DateTime::from_timestamp_millis(self.open_time)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// `GET /api/v3/account`
#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
pub struct RawBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

impl AccountInfo {
    pub fn to_balances(&self) -> ExchangeResult<Balances> {
        let mut balances = Balances::new();
        for raw in &self.balances {
            balances.set(
                &raw.asset,
                AssetBalance {
                    free: parse_num(&raw.free, "free balance")?,
                    locked: parse_num(&raw.locked, "locked balance")?,
                },
            );
        }
        Ok(balances)
    }
}

/// `POST /api/v3/order` with `newOrderRespType=FULL`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
    pub side: String,
    pub executed_qty: String,
    pub cummulative_quote_qty: String,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub commission_asset: String,
}

impl OrderResponse {
    pub fn to_receipt(&self) -> ExchangeResult<OrderReceipt> {
        let side = match self.side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(ExchangeError::Decode(format!("unknown order side '{}'", other))),
        };
        let executed_qty = parse_num(&self.executed_qty, "executedQty")?;
        let quote_qty = parse_num(&self.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let avg_price = if executed_qty > 0.0 {
            quote_qty / executed_qty
        } else {
            0.0
        };

        let commission_asset = self.fills.first().map(|f| f.commission_asset.clone());
        let mut commission = 0.0;
        for fill in &self.fills {
            if Some(&fill.commission_asset) == commission_asset.as_ref() {
                commission += parse_num(&fill.commission, "commission")?;
            }
        }

        Ok(OrderReceipt {
            order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id.clone(),
            side,
            status: self.status.clone(),
            executed_qty,
            avg_price,
            commission,
            commission_asset,
        })
    }
}

/// `GET /api/v3/exchangeInfo?symbol=..`
#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

impl SymbolInfo {
    fn filter_field(&self, filter_type: &str, field: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(field))
            .and_then(|v| v.as_str())
    }

    /// LOT_SIZE and NOTIONAL (or legacy MIN_NOTIONAL) filters
    pub fn to_market_rules(&self) -> ExchangeResult<MarketRules> {
        let decimal = |raw: Option<&str>, field: &str| -> ExchangeResult<Decimal> {
            match raw {
                Some(s) => Decimal::from_str(s)
                    .map_err(|_| ExchangeError::Decode(format!("invalid {} '{}'", field, s))),
                None => Ok(Decimal::ZERO),
            }
        };

        let step_size = decimal(self.filter_field("LOT_SIZE", "stepSize"), "stepSize")?;
        let min_qty = decimal(self.filter_field("LOT_SIZE", "minQty"), "minQty")?;
        let min_notional = match self
            .filter_field("NOTIONAL", "minNotional")
            .or_else(|| self.filter_field("MIN_NOTIONAL", "minNotional"))
        {
            Some(raw) => parse_num(raw, "minNotional")?,
            None => 0.0,
        };

        Ok(MarketRules {
            step_size: step_size.normalize(),
            min_qty: min_qty.normalize(),
            min_notional,
        })
    }
}

/// Kline stream event (`<symbol>@kline_<interval>`)
#[derive(Debug, Deserialize)]
pub struct WsKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: WsKline,
}

#[derive(Debug, Deserialize)]
pub struct WsKline {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl WsKline {
    pub fn to_candle(&self) -> ExchangeResult<Candle> {
        Ok(Candle {
            datetime: millis_to_datetime(self.open_time)?,
            open: parse_num(&self.open, "open")?,
            high: parse_num(&self.high, "high")?,
            low: parse_num(&self.low, "low")?,
            close: parse_num(&self.close, "close")?,
            volume: parse_num(&self.volume, "volume")?,
        })
    }
}

pub(crate) fn event_time(ms: i64) -> ExchangeResult<DateTime<Utc>> {
    millis_to_datetime(ms)
}

/// Valid Binance intervals
pub const BINANCE_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

/// Check if interval is valid for Binance
pub fn is_valid_interval(interval: &str) -> bool {
    BINANCE_INTERVALS.contains(&interval)
}
