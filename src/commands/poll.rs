//! Polling RSI bot command

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use super::{
    build_client, build_runtime, live_countdown, load_config, paper_exchange, print_banner,
    shutdown_signal, Mode,
};
use kline_traders::exchange::Exchange;
use kline_traders::trader::PollingTrader;
use kline_traders::Config;

pub fn run(config_path: Option<PathBuf>, paper: bool, live: bool) -> Result<()> {
    let mode = Mode::from_flags(paper, live)?;
    let config = load_config(config_path)?;

    build_runtime()?.block_on(run_async(config, mode))
}

async fn run_async(config: Config, mode: Mode) -> Result<()> {
    let strategy = &config.polling.strategy;
    print_banner(
        "RSI POLLING",
        mode,
        &config,
        &[
            (
                "RSI",
                format!(
                    "{} ({:?}), buy < {}, sell > {}",
                    strategy.rsi_period,
                    strategy.rsi_method,
                    strategy.rsi_buy_threshold,
                    strategy.rsi_sell_threshold
                ),
            ),
            (
                "Exits",
                format!(
                    "take profit {:.2}%, stop loss {:.2}%",
                    strategy.take_profit * 100.0,
                    strategy.stop_loss * 100.0
                ),
            ),
            (
                "Interval",
                format!("{} seconds", config.polling.interval_secs),
            ),
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
    let mut trader = PollingTrader::new(
        exchange,
        &config.trading,
        config.polling.clone(),
        config.exchange.taker_fee,
    );

    trader.run(shutdown_signal()).await?;
    info!("Polling session ended.");
    Ok(())
}
