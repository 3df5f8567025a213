//! Polling RSI trader
//!
//! Each step fetches the latest candle, rolls the window, recomputes RSI over the whole
//! window and applies the threshold rules:
//! 1. Entry when flat and oversold
//! 2. Signal exit when long and overbought (sells the whole free base balance)
//! 3. Take profit / stop loss on the still-open position, re-entering after a stop loss
//!    while RSI stays oversold
//!
//! A failed order leaves the position untouched; the next step tries again.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::ledger::TradeLedger;
use crate::config::{PollingConfig, TradingConfig};
use crate::error::ExchangeResult;
use crate::exchange::Exchange;
use crate::position::PositionState;
use crate::strategies::RsiThresholdStrategy;
use crate::types::{Candle, ExitReason, MarketRules, OrderRequest, Side, Symbol, Trade};

/// Result of one polling step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed { price: f64, rsi: Option<f64> },
    /// Balance could not be fetched; the loop waits the retry delay
    BalanceUnavailable,
}

pub struct PollingTrader<E: Exchange> {
    exchange: E,
    strategy: RsiThresholdStrategy,
    symbol: Symbol,
    timeframe: String,
    settings: PollingConfig,
    fee: f64,
    quote_reserve: f64,
    rules: MarketRules,
    candles: VecDeque<Candle>,
    position: PositionState,
    ledger: TradeLedger,
}

impl<E: Exchange> PollingTrader<E> {
    pub fn new(exchange: E, trading: &TradingConfig, settings: PollingConfig, fee: f64) -> Self {
        PollingTrader {
            exchange,
            strategy: RsiThresholdStrategy::new(settings.strategy.clone()),
            symbol: trading.symbol.clone(),
            timeframe: trading.timeframe.clone(),
            fee,
            quote_reserve: trading.quote_reserve,
            rules: MarketRules::default(),
            candles: VecDeque::with_capacity(settings.history_limit as usize + 1),
            position: PositionState::Flat,
            ledger: TradeLedger::new(),
            settings,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn candles(&self) -> &VecDeque<Candle> {
        &self.candles
    }

    /// Load the initial window and the pair's trading rules
    pub async fn bootstrap(&mut self) -> Result<()> {
        info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            limit = self.settings.history_limit,
            "Fetching initial OHLCV data..."
        );
        let history = self
            .exchange
            .fetch_ohlcv(&self.symbol, &self.timeframe, self.settings.history_limit)
            .await
            .context("Failed to fetch initial candles")?;

        self.candles.clear();
        for candle in history {
            self.push_candle(candle);
        }

        self.rules = match self.exchange.market_rules(&self.symbol).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Could not load market rules, orders are not pre-validated: {}", e);
                MarketRules::default()
            }
        };

        info!(candles = self.candles.len(), "Initial data loaded");
        Ok(())
    }

    /// Add a candle to the window; a repeated open time replaces the last candle
    fn push_candle(&mut self, candle: Candle) {
        match self.candles.back_mut() {
            Some(last) if last.datetime == candle.datetime => *last = candle,
            Some(last) if last.datetime > candle.datetime => {
                debug!(at = %candle.datetime, "Ignoring out-of-order candle");
            }
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.settings.history_limit as usize {
                    self.candles.pop_front();
                }
            }
        }
    }

    pub async fn step(&mut self) -> Result<StepOutcome> {
        let latest = self
            .exchange
            .fetch_ohlcv(&self.symbol, &self.timeframe, 1)
            .await
            .context("Failed to fetch latest candle")?;
        let candle = latest
            .into_iter()
            .last()
            .context("Exchange returned no candles")?;
        let price = candle.close;
        self.push_candle(candle);

        let closes: Vec<f64> = self.candles.iter().map(|c| c.close).collect();
        let rsi = self.strategy.rsi(&closes);
        match rsi {
            Some(rsi) => info!("Current Price: {:.2} {}, RSI: {:.2}", price, self.symbol.quote, rsi),
            None => info!(
                "Current Price: {:.2} {}, RSI: n/a ({} candles)",
                price,
                self.symbol.quote,
                closes.len()
            ),
        }

        let balances = match self.exchange.fetch_balance().await {
            Ok(balances) => balances,
            Err(e) => {
                error!("Error fetching {} balance: {}", self.symbol.quote, e);
                return Ok(StepOutcome::BalanceUnavailable);
            }
        };
        let quote_balance = balances.free(&self.symbol.quote);
        info!("Current {} Balance: {:.4}", self.symbol.quote, quote_balance);
        let trade_amount = (quote_balance - self.quote_reserve).max(0.0);

        if let Some(rsi) = rsi {
            if self.strategy.should_enter(&self.position, rsi) {
                self.enter(price, trade_amount).await;
            }

            if self.strategy.signal_exit(&self.position, rsi) {
                match self.base_balance().await {
                    Ok(amount) if amount > 0.0 => {
                        self.exit(price, amount, ExitReason::Signal).await;
                    }
                    Ok(_) => warn!("Insufficient {} balance for selling.", self.symbol.base),
                    Err(e) => error!("Error fetching {} balance: {}", self.symbol.base, e),
                }
            }
        }

        if let Some(reason) = self.strategy.protective_exit(&self.position, price) {
            let closed = match self.base_balance().await {
                Ok(amount) if amount > 0.0 => self.exit(price, amount, reason).await,
                Ok(_) => {
                    warn!("Insufficient {} balance for {}", self.symbol.base, reason);
                    false
                }
                Err(e) => {
                    error!("Error fetching {} balance for {}: {}", self.symbol.base, reason, e);
                    false
                }
            };

            let oversold = rsi.is_some_and(|rsi| self.strategy.should_enter(&self.position, rsi));
            if closed && reason == ExitReason::StopLoss && oversold {
                info!("Re-entering after stop loss");
                self.enter(price, trade_amount).await;
            }
        }

        Ok(StepOutcome::Completed { price, rsi })
    }

    async fn base_balance(&self) -> ExchangeResult<f64> {
        let amount = self.exchange.fetch_balance().await?.free(&self.symbol.base);
        info!("Current {} Balance: {}", self.symbol.base, amount);
        Ok(amount)
    }

    async fn enter(&mut self, price: f64, trade_amount: f64) -> bool {
        let raw_quantity = self.strategy.order_quantity(trade_amount, price, self.fee);
        let Some(quantity) = self.rules.round_quantity(raw_quantity, price) else {
            warn!(
                trade_amount,
                quantity = raw_quantity,
                "Buy size below exchange minimum, skipping entry"
            );
            return false;
        };

        let order = OrderRequest::market(self.symbol.clone(), Side::Buy, quantity, price);
        match self.exchange.create_order(&order).await {
            Ok(receipt) => {
                info!(order_id = %receipt.order_id, status = %receipt.status, "Order placed");
                let entry_price = receipt.fill_price_or(price);
                let filled = match receipt.net_base_quantity(&self.symbol.base) {
                    q if q > 0.0 => q,
                    _ => raw_quantity,
                };
                self.position = PositionState::Open(self.strategy.open_position(
                    entry_price,
                    filled,
                    Utc::now(),
                ));
                info!(
                    "BUY {:.6} {} at {:.2} {}",
                    filled, self.symbol.base, entry_price, self.symbol.quote
                );
                true
            }
            Err(e) => {
                error!("Error placing buy order: {}", e);
                false
            }
        }
    }

    async fn exit(&mut self, price: f64, amount: f64, reason: ExitReason) -> bool {
        let Some(quantity) = self.rules.round_quantity(amount, price) else {
            warn!(amount, "Sell size below exchange minimum, keeping position");
            return false;
        };

        let order = OrderRequest::market(self.symbol.clone(), Side::Sell, quantity, price);
        let receipt = match self.exchange.create_order(&order).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Error placing sell order: {}", e);
                return false;
            }
        };
        info!(order_id = %receipt.order_id, status = %receipt.status, "Order placed");

        let Some(open) = self.position.close() else {
            return true;
        };
        let exit_price = receipt.fill_price_or(price);
        let sold = if receipt.executed_qty > 0.0 {
            receipt.executed_qty
        } else {
            amount
        };
        let trade = Trade {
            symbol: self.symbol.clone(),
            direction: open.direction,
            entry_price: open.entry_price,
            exit_price,
            quantity: sold,
            entry_time: open.entry_time,
            exit_time: Utc::now(),
            pnl: (exit_price - open.entry_price) * sold,
            reason,
        };
        info!(
            "{}: SELL {:.6} {} at {:.2} {} | PnL: {:.2} {}",
            reason,
            sold,
            self.symbol.base,
            exit_price,
            self.symbol.quote,
            trade.pnl,
            self.symbol.quote
        );
        self.ledger.record(trade);
        true
    }

    /// Bootstrap, then step every interval until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting live trading...");

        loop {
            match self.bootstrap().await {
                Ok(()) => break,
                Err(e) => {
                    error!("Bootstrap failed: {:#}", e);
                    tokio::select! {
                        _ = sleep(self.settings.retry_delay()) => {}
                        _ = &mut shutdown => {
                            info!("Shutdown requested before trading started");
                            return Ok(());
                        }
                    }
                }
            }
        }

        loop {
            let delay = match self.step().await {
                Ok(StepOutcome::Completed { .. }) => self.settings.interval(),
                Ok(StepOutcome::BalanceUnavailable) => self.settings.retry_delay(),
                Err(e) => {
                    error!("Error in live trading: {:#}", e);
                    self.settings.retry_delay()
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(open) = self.position.open_position() {
            warn!(
                entry = open.entry_price,
                quantity = open.quantity,
                "Leaving position open at shutdown"
            );
        }
        self.ledger.log_summary();
        Ok(())
    }
}
