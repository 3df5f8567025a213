//! Streaming grid trader
//!
//! Consumes kline events (the in-progress candle is reported on every trade tick), keeps
//! a rolling candle window and on every tick:
//! 1. Recomputes the indicator snapshot
//! 2. Ratchets trailing stops and closes grid trades whose exit fired
//! 3. Evaluates at most one new entry
//!
//! An order that fails leaves the grid unchanged; the next tick re-evaluates.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ledger::TradeLedger;
use crate::config::{StreamingConfig, TradingConfig};
use crate::exchange::{Exchange, KlineEvent};
use crate::strategies::{GridTrade, GridTrendStrategy, IndicatorSnapshot};
use crate::types::{Candle, Direction, ExitReason, MarketRules, OrderRequest, Symbol, Trade};

/// What a single kline event led to
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Not enough candles for every indicator yet
    WarmingUp,
    Evaluated { closed: usize, opened: bool },
}

pub struct StreamingTrader<E: Exchange> {
    exchange: E,
    strategy: GridTrendStrategy,
    symbol: Symbol,
    timeframe: String,
    settings: StreamingConfig,
    fee: f64,
    quote_reserve: f64,
    rules: MarketRules,
    candles: VecDeque<Candle>,
    grid: Vec<GridTrade>,
    next_trade_id: u64,
    last_entry_candle: Option<DateTime<Utc>>,
    ledger: TradeLedger,
}

impl<E: Exchange> StreamingTrader<E> {
    pub fn new(exchange: E, trading: &TradingConfig, settings: StreamingConfig, fee: f64) -> Self {
        StreamingTrader {
            exchange,
            strategy: GridTrendStrategy::new(settings.strategy.clone()),
            symbol: trading.symbol.clone(),
            timeframe: trading.timeframe.clone(),
            fee,
            quote_reserve: trading.quote_reserve,
            rules: MarketRules::default(),
            candles: VecDeque::with_capacity(settings.warmup_candles as usize + 1),
            grid: Vec::new(),
            next_trade_id: 1,
            last_entry_candle: None,
            ledger: TradeLedger::new(),
            settings,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn grid(&self) -> &[GridTrade] {
        &self.grid
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn candles(&self) -> &VecDeque<Candle> {
        &self.candles
    }

    /// Seed the window over REST and load the pair's trading rules
    pub async fn warm_up(&mut self) -> Result<()> {
        info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            candles = self.settings.warmup_candles,
            "Fetching warm-up candles..."
        );
        let history = self
            .exchange
            .fetch_ohlcv(&self.symbol, &self.timeframe, self.settings.warmup_candles)
            .await
            .context("Failed to fetch warm-up candles")?;

        self.candles.clear();
        for candle in history {
            self.update_window(candle);
        }

        self.rules = match self.exchange.market_rules(&self.symbol).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Could not load market rules, orders are not pre-validated: {}", e);
                MarketRules::default()
            }
        };

        let needed = self.strategy.config().min_candles();
        if self.candles.len() < needed {
            warn!(
                have = self.candles.len(),
                needed, "Fewer candles than the indicators need, trading starts once warmed up"
            );
        }
        info!(candles = self.candles.len(), "Warm-up complete");
        Ok(())
    }

    fn update_window(&mut self, candle: Candle) {
        match self.candles.back_mut() {
            Some(last) if last.datetime == candle.datetime => *last = candle,
            Some(last) if last.datetime > candle.datetime => {
                debug!(at = %candle.datetime, "Ignoring out-of-order candle");
            }
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.settings.warmup_candles as usize {
                    self.candles.pop_front();
                }
            }
        }
    }

    pub async fn on_event(&mut self, event: &KlineEvent) -> EventOutcome {
        if !event.symbol.eq_ignore_ascii_case(&self.symbol.pair()) {
            warn!(symbol = %event.symbol, "Ignoring kline for another symbol");
            return EventOutcome::Evaluated {
                closed: 0,
                opened: false,
            };
        }

        let candle_time = event.candle.datetime;
        self.update_window(event.candle.clone());

        let Some(snap) = self.strategy.snapshot(self.candles.make_contiguous()) else {
            debug!(candles = self.candles.len(), "Indicators warming up");
            return EventOutcome::WarmingUp;
        };

        if event.is_closed {
            info!(
                close = format!("{:.2}", snap.close),
                rsi = format!("{:.2}", snap.rsi),
                atr = format!("{:.4}", snap.atr),
                bb_lower = format!("{:.2}", snap.bb_lower),
                bb_upper = format!("{:.2}", snap.bb_upper),
                macd = format!("{:.4}", snap.macd),
                open_trades = self.grid.len(),
                "Candle closed"
            );
        } else {
            debug!(close = snap.close, rsi = snap.rsi, "Tick");
        }

        let closed = self.manage_exits(&snap).await;
        let opened = self.evaluate_entry(&snap, candle_time).await;
        EventOutcome::Evaluated { closed, opened }
    }

    async fn manage_exits(&mut self, snap: &IndicatorSnapshot) -> usize {
        let mut closed = 0;
        let mut index = 0;

        while index < self.grid.len() {
            if let Some(stop) = self.strategy.update_trailing(&mut self.grid[index], snap.close) {
                debug!(trade = self.grid[index].id, stop, "Trailing stop moved");
            }

            if let Some(reason) = self.strategy.exit_reason(&self.grid[index], snap) {
                if self.close_trade(index, snap.close, reason).await {
                    closed += 1;
                    continue;
                }
            }
            index += 1;
        }

        closed
    }

    async fn evaluate_entry(&mut self, snap: &IndicatorSnapshot, candle_time: DateTime<Utc>) -> bool {
        if self.last_entry_candle == Some(candle_time) {
            return false;
        }
        let Some(direction) = self.strategy.entry_signal(snap) else {
            return false;
        };
        if !self
            .strategy
            .can_add(direction, snap.close, snap.atr, &self.grid)
        {
            debug!(?direction, open = self.grid.len(), "Entry signal blocked by grid limits");
            return false;
        }

        let opened = self.open_trade(direction, snap).await;
        if opened {
            self.last_entry_candle = Some(candle_time);
        }
        opened
    }

    async fn open_trade(&mut self, direction: Direction, snap: &IndicatorSnapshot) -> bool {
        let price = snap.close;
        let balances = match self.exchange.fetch_balance().await {
            Ok(balances) => balances,
            Err(e) => {
                error!("Error fetching balance, skipping entry: {}", e);
                return false;
            }
        };

        let equity =
            balances.total(&self.symbol.quote) + balances.total(&self.symbol.base) * price;
        let max_quantity = match direction {
            Direction::Long => {
                let available = balances.free(&self.symbol.quote) - self.quote_reserve;
                self.strategy.slot_budget(available, self.grid.len()) / price
            }
            // shorts sell held inventory
            Direction::Short => self
                .strategy
                .slot_budget(balances.free(&self.symbol.base), self.grid.len()),
        };

        let (stop, _) = self.strategy.initial_levels(direction, price, snap.atr);
        let raw_quantity = self
            .strategy
            .position_size(price, stop, equity, max_quantity, self.fee);
        let Some(quantity) = self.rules.round_quantity(raw_quantity, price) else {
            warn!(
                ?direction,
                quantity = raw_quantity,
                "Entry size below exchange minimum, skipping"
            );
            return false;
        };

        let order = OrderRequest::market(
            self.symbol.clone(),
            direction.entry_side(),
            quantity,
            price,
        );
        let receipt = match self.exchange.create_order(&order).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Error placing entry order: {}", e);
                return false;
            }
        };

        let entry_price = receipt.fill_price_or(price);
        let filled = match direction {
            Direction::Long => receipt.net_base_quantity(&self.symbol.base),
            Direction::Short => receipt.executed_qty,
        };
        let filled = if filled > 0.0 { filled } else { raw_quantity };

        let trade = self.strategy.open_trade(
            self.next_trade_id,
            direction,
            entry_price,
            filled,
            snap.atr,
            Utc::now(),
        );
        self.next_trade_id += 1;

        info!(
            trade = trade.id,
            ?direction,
            quantity = filled,
            entry = format!("{:.2}", entry_price),
            stop = format!("{:.2}", trade.position.stop_price),
            target = format!("{:.2}", trade.position.target_price),
            open_trades = self.grid.len() + 1,
            "Grid trade opened"
        );
        self.grid.push(trade);
        true
    }

    async fn close_trade(&mut self, index: usize, price: f64, reason: ExitReason) -> bool {
        let position = &self.grid[index].position;
        let Some(quantity) = self.rules.round_quantity(position.quantity, price) else {
            warn!(
                trade = self.grid[index].id,
                quantity = position.quantity,
                "Exit size below exchange minimum, keeping trade open"
            );
            return false;
        };

        let order = OrderRequest::market(
            self.symbol.clone(),
            position.direction.exit_side(),
            quantity,
            price,
        );
        let receipt = match self.exchange.create_order(&order).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    trade = self.grid[index].id,
                    "Error placing {} exit order: {}", reason, e
                );
                return false;
            }
        };

        let grid_trade = self.grid.remove(index);
        let position = grid_trade.position;
        let exit_price = receipt.fill_price_or(price);
        info!(trade = grid_trade.id, %reason, exit = format!("{:.2}", exit_price), "Grid trade closed");

        self.ledger.record(Trade {
            symbol: self.symbol.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            entry_time: position.entry_time,
            exit_time: Utc::now(),
            pnl: position.realized_pnl(exit_price),
            reason,
        });
        true
    }

    /// Market-close every open grid trade at the last known price
    pub async fn close_on_shutdown(&mut self) -> usize {
        let Some(price) = self.candles.back().map(|c| c.close) else {
            return 0;
        };

        let mut closed = 0;
        let mut index = 0;
        while index < self.grid.len() {
            if self.close_trade(index, price, ExitReason::Shutdown).await {
                closed += 1;
            } else {
                index += 1;
            }
        }
        closed
    }

    /// Consume events until the channel closes or `shutdown` resolves
    pub async fn run<F>(&mut self, mut events: mpsc::Receiver<KlineEvent>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting streaming trading...");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.on_event(&event).await;
                    }
                    None => {
                        warn!("Kline stream ended");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if self.settings.close_on_shutdown {
            let closed = self.close_on_shutdown().await;
            info!(closed, remaining = self.grid.len(), "Closed grid trades on shutdown");
        } else if !self.grid.is_empty() {
            warn!(open_trades = self.grid.len(), "Leaving grid trades open at shutdown");
        }

        self.ledger.log_summary();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trader::test_support::{candle, ScriptedExchange};
    use crate::types::{AssetBalance, Side};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// 199 candles alternating between 100 and 101
    fn choppy_history() -> Vec<Candle> {
        (0..199)
            .map(|i| candle(i, if i % 2 == 0 { 100.0 } else { 101.0 }))
            .collect()
    }

    fn event(minute: i64, close: f64, is_closed: bool) -> KlineEvent {
        let candle = candle(minute, close);
        KlineEvent {
            symbol: "ETHUSDC".to_string(),
            interval: "1m".to_string(),
            event_time: candle.datetime,
            candle,
            is_closed,
        }
    }

    fn settings(close_on_shutdown: bool) -> StreamingConfig {
        StreamingConfig {
            close_on_shutdown,
            ..Default::default()
        }
    }

    async fn trader(
        exchange: Arc<ScriptedExchange>,
        close_on_shutdown: bool,
    ) -> StreamingTrader<Arc<ScriptedExchange>> {
        trader_with(exchange, settings(close_on_shutdown)).await
    }

    async fn trader_with(
        exchange: Arc<ScriptedExchange>,
        settings: StreamingConfig,
    ) -> StreamingTrader<Arc<ScriptedExchange>> {
        let mut trader =
            StreamingTrader::new(exchange, &TradingConfig::default(), settings, 0.00075);
        trader.warm_up().await.unwrap();
        trader
    }

    fn evaluated(closed: usize, opened: bool) -> EventOutcome {
        EventOutcome::Evaluated { closed, opened }
    }

    #[tokio::test]
    async fn test_warming_up_with_short_history() {
        let history: Vec<Candle> = (0..10).map(|i| candle(i, 100.0)).collect();
        let exchange = Arc::new(ScriptedExchange::new(history, 1000.0));
        let mut trader = trader(exchange, false).await;
        assert_eq!(trader.on_event(&event(10, 99.0, false)).await, EventOutcome::WarmingUp);
    }

    #[tokio::test]
    async fn test_entry_one_per_candle_then_take_profit() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut trader = trader(exchange.clone(), false).await;
        assert_eq!(trader.candles().len(), 199);

        // sharp drop below the lower band with RSI under 30
        let outcome = trader.on_event(&event(199, 90.0, false)).await;
        assert_eq!(
            outcome,
            EventOutcome::Evaluated {
                closed: 0,
                opened: true
            }
        );
        let trade = trader.grid()[0].clone();
        assert_eq!(trade.position.direction, Direction::Long);
        assert_relative_eq!(trade.position.stop_price, 88.0, epsilon = 1e-9);
        assert_relative_eq!(trade.position.target_price, 93.0, epsilon = 1e-9);
        // capped by a third of (1000 - 2) quote, fee applied
        assert_relative_eq!(
            trade.position.quantity,
            998.0 / 3.0 / 90.0 * (1.0 - 0.00075),
            epsilon = 1e-6
        );

        // same candle again: no second entry
        let outcome = trader.on_event(&event(199, 89.0, true)).await;
        assert_eq!(
            outcome,
            EventOutcome::Evaluated {
                closed: 0,
                opened: false
            }
        );
        assert_eq!(trader.grid().len(), 1);
        assert_eq!(trader.candles().len(), 200);

        let outcome = trader.on_event(&event(200, 93.5, false)).await;
        assert_eq!(
            outcome,
            EventOutcome::Evaluated {
                closed: 1,
                opened: false
            }
        );
        assert!(trader.grid().is_empty());
        assert_eq!(trader.candles().len(), 200);

        let trades = trader.ledger().trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, ExitReason::TakeProfit);
        assert_relative_eq!(trades[0].pnl, 3.5 * trade.position.quantity, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_trailing_stop_follows_profit_then_closes() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut trader = trader(exchange.clone(), false).await;
        trader.on_event(&event(199, 90.0, false)).await;
        assert_eq!(trader.grid().len(), 1);
        assert_eq!(trader.grid()[0].position.trailing_stop, None);

        // best price 92.5, trailing 1.5 ATR behind it and above the 88 stop
        assert_eq!(trader.on_event(&event(200, 92.5, false)).await, evaluated(0, false));
        let position = &trader.grid()[0].position;
        assert_relative_eq!(position.trailing_stop.unwrap(), 91.0, epsilon = 1e-9);
        assert!(position.trailing_active());

        assert_eq!(trader.on_event(&event(201, 91.0, false)).await, evaluated(1, false));
        assert!(trader.grid().is_empty());
        let trades = trader.ledger().trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, ExitReason::TrailingStop);
        assert!(trades[0].pnl > 0.0);
    }

    #[tokio::test]
    async fn test_short_entry_sells_inventory_and_buys_back() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        exchange
            .balances
            .lock()
            .unwrap()
            .set("ETH", AssetBalance { free: 5.0, locked: 0.0 });
        let mut settings = settings(false);
        settings.strategy.allow_short = true;
        let mut trader = trader_with(exchange.clone(), settings).await;

        // spike above the upper band with RSI over 70
        assert_eq!(trader.on_event(&event(199, 112.0, false)).await, evaluated(0, true));
        let trade = trader.grid()[0].clone();
        assert_eq!(trade.position.direction, Direction::Short);
        assert_relative_eq!(trade.position.stop_price, 114.0, epsilon = 1e-9);
        assert_relative_eq!(trade.position.target_price, 109.0, epsilon = 1e-9);
        // a third of the 5 ETH held, below the 1% risk size
        assert_relative_eq!(
            trade.position.quantity,
            5.0 / 3.0 * (1.0 - 0.00075),
            epsilon = 1e-6
        );

        assert_eq!(trader.on_event(&event(200, 108.5, false)).await, evaluated(1, false));
        let trades = trader.ledger().trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].direction, Direction::Short);
        assert_eq!(trades[0].reason, ExitReason::TakeProfit);
        assert_relative_eq!(trades[0].pnl, 3.5 * trade.position.quantity, epsilon = 1e-9);

        let sides: Vec<Side> = exchange.orders().iter().map(|o| o.side).collect();
        assert_eq!(sides, vec![Side::Sell, Side::Buy]);
        assert_relative_eq!(exchange.free("ETH"), 5.0, epsilon = 1e-6);
        assert!(exchange.free("USDC") > 1000.0);
    }

    #[tokio::test]
    async fn test_grid_spacing_and_cap_across_candles() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut settings = settings(false);
        // wide stops so the falling closes below only test grid limits
        settings.strategy.stop_atr_mult = 5.0;
        let mut trader = trader_with(exchange.clone(), settings).await;

        assert_eq!(trader.on_event(&event(199, 90.0, true)).await, evaluated(0, true));
        // half an ATR from the open trade
        assert_eq!(trader.on_event(&event(200, 89.5, true)).await, evaluated(0, false));
        assert_eq!(trader.on_event(&event(201, 88.75, true)).await, evaluated(0, true));
        assert_eq!(trader.on_event(&event(202, 87.5, true)).await, evaluated(0, true));
        // three trades is the cap
        assert_eq!(trader.on_event(&event(203, 86.25, true)).await, evaluated(0, false));

        let entries: Vec<f64> = trader
            .grid()
            .iter()
            .map(|t| t.position.entry_price)
            .collect();
        assert_eq!(entries, vec![90.0, 88.75, 87.5]);
        assert!(trader
            .grid()
            .iter()
            .all(|t| t.position.direction == Direction::Long));
        assert_eq!(exchange.orders().len(), 3);
        assert!(trader.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_failed_exit_keeps_trade_open() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut trader = trader(exchange.clone(), false).await;
        trader.on_event(&event(199, 90.0, false)).await;
        assert_eq!(trader.grid().len(), 1);

        exchange.set_fail_orders(true);
        trader.on_event(&event(200, 93.5, false)).await;
        assert_eq!(trader.grid().len(), 1);
        assert!(trader.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_run_closes_grid_on_shutdown() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut trader = trader(exchange.clone(), true).await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(event(199, 90.0, false)).await.unwrap();
        drop(tx);

        trader.run(rx, std::future::pending()).await.unwrap();

        assert!(trader.grid().is_empty());
        let trades = trader.ledger().trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, ExitReason::Shutdown);
        assert_eq!(exchange.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_ignores_other_symbols() {
        let exchange = Arc::new(ScriptedExchange::new(choppy_history(), 1000.0));
        let mut trader = trader(exchange.clone(), false).await;
        let mut other = event(199, 90.0, false);
        other.symbol = "BTCUSDC".to_string();
        trader.on_event(&other).await;
        assert!(trader.grid().is_empty());
        assert_eq!(trader.candles().len(), 199);
    }
}
