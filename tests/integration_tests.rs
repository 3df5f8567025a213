//! Integration tests for the trading bots
//!
//! Both traders run against a paper account layered over canned market data, the same
//! wiring the binary uses with the real REST client underneath.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use kline_traders::config::{PollingConfig, StreamingConfig, TradingConfig};
use kline_traders::exchange::{parse_kline_message, Exchange, KlineEvent, PaperExchange};
use kline_traders::indicators::RsiMethod;
use kline_traders::trader::{EventOutcome, PollingTrader, StepOutcome, StreamingTrader};
use kline_traders::{
    Balances, Candle, Config, ExchangeError, ExchangeResult, ExitReason, OrderReceipt,
    OrderRequest, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

const FEE: f64 = 0.00075;

fn candle(minute: i64, close: f64) -> Candle {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Candle {
        datetime: start + Duration::minutes(minute),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 10.0,
    }
}

/// Read-only market: history for warm-up requests, a queue for single-candle polls
struct CannedMarket {
    history: Vec<Candle>,
    latest: Mutex<VecDeque<Candle>>,
}

impl CannedMarket {
    fn new(history: Vec<Candle>) -> Self {
        CannedMarket {
            history,
            latest: Mutex::new(VecDeque::new()),
        }
    }

    fn push_latest(&self, candle: Candle) {
        self.latest.lock().unwrap().push_back(candle);
    }
}

#[async_trait]
impl Exchange for CannedMarket {
    async fn fetch_ohlcv(
        &self,
        _symbol: &Symbol,
        _interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        if limit == 1 {
            return self
                .latest
                .lock()
                .unwrap()
                .pop_front()
                .map(|c| vec![c])
                .ok_or_else(|| ExchangeError::Decode("no candle queued".into()));
        }
        let skip = self.history.len().saturating_sub(limit as usize);
        Ok(self.history[skip..].to_vec())
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        Err(ExchangeError::MissingCredentials("account"))
    }

    async fn create_order(&self, _order: &OrderRequest) -> ExchangeResult<OrderReceipt> {
        Err(ExchangeError::MissingCredentials("orders"))
    }
}

fn paper(market: Arc<CannedMarket>) -> PaperExchange<Arc<CannedMarket>> {
    PaperExchange::new(market, Balances::new().with_asset("USDC", 1000.0), FEE)
}

// =============================================================================
// Polling bot
// =============================================================================

#[tokio::test]
async fn test_polling_round_trip_on_paper_account() {
    let history: Vec<Candle> = (0..100).map(|i| candle(i, 200.0 - i as f64)).collect();
    let market = Arc::new(CannedMarket::new(history));
    let mut trader = PollingTrader::new(
        paper(market.clone()),
        &TradingConfig::default(),
        PollingConfig::default(),
        FEE,
    );
    trader.bootstrap().await.unwrap();

    market.push_latest(candle(100, 100.0));
    let outcome = trader.step().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed { price, .. } if price == 100.0));
    assert!(trader.position().is_long());

    let after_buy = trader.exchange().balances();
    assert!(after_buy.free("ETH") > 9.9);
    // the quote reserve stays untouched
    assert!(after_buy.free("USDC") >= 2.0);
    assert!(after_buy.free("USDC") < 10.0);

    market.push_latest(candle(101, 150.0));
    trader.step().await.unwrap();
    assert!(trader.position().is_flat());

    let after_sell = trader.exchange().balances();
    assert!(after_sell.free("ETH") < 1e-6);
    assert!(after_sell.free("USDC") > 1400.0);

    let summary = trader.ledger().summary();
    assert_eq!(summary.total_trades, 1);
    assert_eq!(summary.wins, 1);
    assert!(summary.total_pnl > 0.0);
    assert_eq!(trader.ledger().trades()[0].reason, ExitReason::Signal);
}

#[tokio::test]
async fn test_polling_simple_rsi_stays_flat_on_rising_market() {
    let history: Vec<Candle> = (0..100).map(|i| candle(i, 100.0 + i as f64)).collect();
    let market = Arc::new(CannedMarket::new(history));
    let mut settings = PollingConfig::default();
    settings.strategy.rsi_method = RsiMethod::Simple;
    let mut trader = PollingTrader::new(
        paper(market.clone()),
        &TradingConfig::default(),
        settings,
        FEE,
    );
    trader.bootstrap().await.unwrap();

    market.push_latest(candle(100, 201.0));
    let outcome = trader.step().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed { rsi: Some(rsi), .. } if rsi > 60.0));
    assert!(trader.position().is_flat());
    assert_eq!(trader.exchange().balances().free("USDC"), 1000.0);
}

// =============================================================================
// Streaming bot
// =============================================================================

fn choppy_history() -> Vec<Candle> {
    (0..199)
        .map(|i| candle(i, if i % 2 == 0 { 100.0 } else { 101.0 }))
        .collect()
}

fn kline_message(minute: i64, close: f64, closed: bool) -> String {
    let open_time = candle(minute, close).datetime.timestamp_millis();
    format!(
        r#"{{"e":"kline","E":{event},"s":"ETHUSDC","k":{{"t":{open},"T":{close_time},"s":"ETHUSDC","i":"1m","f":1,"L":2,"o":"{price}","c":"{price}","h":"{high}","l":"{low}","v":"10.0","n":2,"x":{closed},"q":"1000.0","V":"5.0","Q":"500.0","B":"0"}}}}"#,
        event = open_time + 1_000,
        open = open_time,
        close_time = open_time + 59_999,
        price = close,
        high = close + 0.5,
        low = close - 0.5,
        closed = closed,
    )
}

fn event(minute: i64, close: f64, closed: bool) -> KlineEvent {
    parse_kline_message(&kline_message(minute, close, closed))
        .unwrap()
        .unwrap()
}

async fn streaming_trader(
    close_on_shutdown: bool,
) -> StreamingTrader<PaperExchange<Arc<CannedMarket>>> {
    let market = Arc::new(CannedMarket::new(choppy_history()));
    let settings = StreamingConfig {
        close_on_shutdown,
        ..Default::default()
    };
    let mut trader = StreamingTrader::new(paper(market), &TradingConfig::default(), settings, FEE);
    trader.warm_up().await.unwrap();
    trader
}

#[tokio::test]
async fn test_streaming_take_profit_on_paper_account() {
    let mut trader = streaming_trader(false).await;

    let outcome = trader.on_event(&event(199, 90.0, false)).await;
    assert_eq!(
        outcome,
        EventOutcome::Evaluated {
            closed: 0,
            opened: true
        }
    );
    assert_eq!(trader.grid().len(), 1);
    assert!(trader.exchange().balances().free("ETH") > 0.0);

    let outcome = trader.on_event(&event(200, 93.5, true)).await;
    assert_eq!(
        outcome,
        EventOutcome::Evaluated {
            closed: 1,
            opened: false
        }
    );
    assert!(trader.grid().is_empty());

    let trades = trader.ledger().trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].reason, ExitReason::TakeProfit);
    assert!(trades[0].pnl > 0.0);
    assert!(trader.exchange().balances().free("USDC") > 1000.0);
}

#[tokio::test]
async fn test_streaming_run_flattens_grid_when_stream_ends() {
    let mut trader = streaming_trader(true).await;

    let (tx, rx) = mpsc::channel(8);
    tx.send(event(199, 90.0, false)).await.unwrap();
    tx.send(event(199, 90.2, true)).await.unwrap();
    drop(tx);

    trader.run(rx, std::future::pending()).await.unwrap();

    assert!(trader.grid().is_empty());
    let trades = trader.ledger().trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].reason, ExitReason::Shutdown);
    assert!(trader.exchange().balances().free("ETH") < 1e-6);
}

#[tokio::test]
async fn test_streaming_run_leaves_grid_open_by_default() {
    let mut trader = streaming_trader(false).await;

    let (tx, rx) = mpsc::channel(8);
    tx.send(event(199, 90.0, false)).await.unwrap();
    drop(tx);

    trader.run(rx, std::future::pending()).await.unwrap();

    assert_eq!(trader.grid().len(), 1);
    assert!(trader.ledger().is_empty());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_bundled_configs_load() {
    let poll = Config::from_file("configs/poll_eth_usdc_1m.json").unwrap();
    poll.validate().unwrap();
    assert_eq!(poll.trading.symbol, "ETH/USDC".parse::<Symbol>().unwrap());
    assert_eq!(poll.polling.strategy.rsi_buy_threshold, 31.0);
    assert_eq!(poll.polling.strategy.rsi_sell_threshold, 60.0);

    let stream = Config::from_file("configs/stream_eth_usdc_1m.json").unwrap();
    stream.validate().unwrap();
    assert_eq!(stream.streaming.warmup_candles, 200);
    assert!(stream.streaming.close_on_shutdown);
    assert_eq!(stream.streaming.strategy.max_grid_trades, 3);
}
