//! Streaming grid bot command

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use super::{
    build_client, build_runtime, live_countdown, load_config, paper_exchange, print_banner,
    shutdown_signal, Mode,
};
use kline_traders::exchange::{Exchange, KlineStream};
use kline_traders::trader::StreamingTrader;
use kline_traders::Config;

/// Buffered kline events between the socket task and the trader
const EVENT_BUFFER: usize = 256;

pub fn run(config_path: Option<PathBuf>, paper: bool, live: bool) -> Result<()> {
    let mode = Mode::from_flags(paper, live)?;
    let config = load_config(config_path)?;

    build_runtime()?.block_on(run_async(config, mode))
}

async fn run_async(config: Config, mode: Mode) -> Result<()> {
    let strategy = &config.streaming.strategy;
    print_banner(
        "GRID STREAMING",
        mode,
        &config,
        &[
            (
                "Grid",
                format!(
                    "max {} trades, spacing {} ATR",
                    strategy.max_grid_trades, strategy.grid_spacing_atr
                ),
            ),
            (
                "Stops",
                format!(
                    "stop {} ATR, target {} ATR, trail {} ATR",
                    strategy.stop_atr_mult,
                    strategy.take_profit_atr_mult,
                    strategy.trailing_atr_mult
                ),
            ),
            (
                "Risk",
                format!("{:.2}% per trade", strategy.risk_per_trade * 100.0),
            ),
            ("Shorts", strategy.allow_short.to_string()),
        ],
    );

    let client = build_client(&config, mode)?;
    match mode {
        Mode::Paper => trade(paper_exchange(client, &config), &config).await,
        Mode::Live => {
            live_countdown().await;
            trade(client, &config).await
        }
    }
}

async fn trade<E: Exchange>(exchange: E, config: &Config) -> Result<()> {
    let mut trader = StreamingTrader::new(
        exchange,
        &config.trading,
        config.streaming.clone(),
        config.exchange.taker_fee,
    );
    trader.warm_up().await?;

    let stream = KlineStream::new(
        &config.exchange.ws_url,
        &config.trading.symbol,
        &config.trading.timeframe,
    )
    .with_reconnect(
        Duration::from_secs(config.streaming.reconnect_delay_secs),
        Duration::from_secs(config.streaming.max_reconnect_delay_secs),
    );
    info!(url = stream.url(), "Subscribing to kline stream");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let stream_task = stream.spawn(tx);

    let result = trader.run(rx, shutdown_signal()).await;
    stream_task.abort();

    result?;
    info!("Streaming session ended.");
    Ok(())
}
