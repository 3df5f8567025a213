//! Paper trading on top of real market data
//!
//! Market data and rules come from the wrapped exchange; balances and fills are simulated.
//! A market order fills completely at its reference price and the taker fee is taken from
//! the asset received, the way Binance charges it without BNB discounts.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use super::Exchange;
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{AssetBalance, Balances, Candle, MarketRules, OrderReceipt, OrderRequest, Side, Symbol};

pub struct PaperExchange<E> {
    inner: E,
    balances: Mutex<Balances>,
    fee_rate: f64,
    next_order_id: AtomicU64,
}

impl<E: Exchange> PaperExchange<E> {
    pub fn new(inner: E, balances: Balances, fee_rate: f64) -> Self {
        PaperExchange {
            inner,
            balances: Mutex::new(balances),
            fee_rate,
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Current simulated balances
    pub fn balances(&self) -> Balances {
        self.lock_balances().clone()
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn lock_balances(&self) -> std::sync::MutexGuard<'_, Balances> {
        // a panic while holding the lock cannot leave balances half-updated
        self.balances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fill(&self, order: &OrderRequest) -> ExchangeResult<OrderReceipt> {
        let price = order.reference_price;
        if !price.is_finite() || price <= 0.0 {
            return Err(ExchangeError::Api {
                status: 400,
                code: -1013,
                msg: format!("invalid reference price {}", price),
            });
        }
        let quantity = order
            .quantity
            .to_f64()
            .filter(|q| *q > 0.0)
            .ok_or_else(|| ExchangeError::Api {
                status: 400,
                code: -1013,
                msg: format!("invalid quantity {}", order.quantity),
            })?;

        let base = &order.symbol.base;
        let quote = &order.symbol.quote;
        let notional = quantity * price;
        let mut balances = self.lock_balances();

        let (spend_asset, spend, receive_asset, receive, commission_asset) = match order.side {
            Side::Buy => {
                let fee = quantity * self.fee_rate;
                (quote, notional, base, quantity - fee, base)
            }
            Side::Sell => {
                let fee = notional * self.fee_rate;
                (base, quantity, quote, notional - fee, quote)
            }
        };

        let mut spent = balances.get(spend_asset);
        if spent.free + 1e-12 < spend {
            return Err(ExchangeError::InsufficientBalance {
                asset: spend_asset.clone(),
                needed: spend,
                available: spent.free,
            });
        }
        spent.free = (spent.free - spend).max(0.0);
        balances.set(spend_asset, spent);

        let gained = balances.get(receive_asset);
        balances.set(
            receive_asset,
            AssetBalance {
                free: gained.free + receive,
                locked: gained.locked,
            },
        );

        let commission = match order.side {
            Side::Buy => quantity - receive,
            Side::Sell => notional - receive,
        };
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);

        info!(
            side = %order.side,
            quantity,
            price,
            commission,
            commission_asset = %commission_asset,
            "[PAPER] Order filled"
        );

        Ok(OrderReceipt {
            order_id: format!("paper-{}", order_id),
            client_order_id: order.client_order_id.clone(),
            side: order.side,
            status: "FILLED".to_string(),
            executed_qty: quantity,
            avg_price: price,
            commission,
            commission_asset: Some(commission_asset.clone()),
        })
    }
}

#[async_trait]
impl<E: Exchange> Exchange for PaperExchange<E> {
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.inner.fetch_ohlcv(symbol, interval, limit).await
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        Ok(self.balances())
    }

    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<OrderReceipt> {
        self.fill(order)
    }

    async fn market_rules(&self, symbol: &Symbol) -> ExchangeResult<MarketRules> {
        self.inner.market_rules(symbol).await
    }
}
