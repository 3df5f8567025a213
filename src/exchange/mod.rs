//! Exchange access
//!
//! Both bots talk to the market through the [`Exchange`] trait:
//! - [`BinanceClient`]: Binance spot REST API (public klines, signed account and orders)
//! - [`PaperExchange`]: simulated balances and fills on top of another exchange's data
//! - [`KlineStream`]: live kline WebSocket feed for the streaming bot

pub mod auth;
mod client;
mod paper;
mod stream;
pub mod types;

pub use auth::Credentials;
pub use client::{BinanceClient, ClientConfig, BINANCE_API_BASE, MAX_KLINES_PER_REQUEST};
pub use paper::PaperExchange;
pub use stream::{parse_kline_message, KlineEvent, KlineStream, BINANCE_WS_BASE};
pub use types::{is_valid_interval, BINANCE_INTERVALS};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ExchangeResult;
use crate::types::{Balances, Candle, MarketRules, OrderReceipt, OrderRequest, Symbol};

/// The operations the trading loops need from an exchange
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent `limit` candles, oldest first
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    async fn fetch_balance(&self) -> ExchangeResult<Balances>;

    /// Place a market order
    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<OrderReceipt>;

    /// Lot and notional filters for `symbol`
    async fn market_rules(&self, _symbol: &Symbol) -> ExchangeResult<MarketRules> {
        Ok(MarketRules::default())
    }
}

#[async_trait]
impl<T: Exchange + ?Sized> Exchange for Arc<T> {
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        (**self).fetch_ohlcv(symbol, interval, limit).await
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        (**self).fetch_balance().await
    }

    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<OrderReceipt> {
        (**self).create_order(order).await
    }

    async fn market_rules(&self, symbol: &Symbol) -> ExchangeResult<MarketRules> {
        (**self).market_rules(symbol).await
    }
}
