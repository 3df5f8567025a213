//! Command implementations and the startup plumbing they share

pub mod poll;
pub mod stream;

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use kline_traders::exchange::{BinanceClient, PaperExchange};
use kline_traders::Config;

/// Trading mode selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Paper,
    Live,
}

impl Mode {
    pub fn from_flags(paper: bool, live: bool) -> Result<Self> {
        match (paper, live) {
            (true, false) => Ok(Mode::Paper),
            (false, true) => Ok(Mode::Live),
            (false, false) => bail!("Must specify either --paper or --live mode"),
            (true, true) => bail!("Cannot specify both --paper and --live modes"),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Mode::Paper => "PAPER",
            Mode::Live => "LIVE",
        }
    }
}

/// Load `.env`, the config file (or defaults) and validate it
pub fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    dotenv::dotenv().ok();

    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load default config".to_string(),
    })?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

pub fn print_banner(bot: &str, mode: Mode, config: &Config, details: &[(&str, String)]) {
    info!("==============================================================");
    info!("  {} BOT - {} MODE", bot, mode.label());
    info!("--------------------------------------------------------------");
    info!("  Symbol:    {}", config.trading.symbol);
    info!("  Timeframe: {}", config.trading.timeframe);
    info!("  Fee:       {:.4}%", config.exchange.taker_fee * 100.0);
    info!("  Reserve:   {} {}", config.trading.quote_reserve, config.trading.symbol.quote);
    for (name, value) in details {
        info!("  {:<10} {}", format!("{}:", name), value);
    }
    info!("==============================================================");
}

/// Give the operator ten seconds to abort before real orders go out
pub async fn live_countdown() {
    warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
    warn!("Press Ctrl+C within 10 seconds to abort...");

    for i in (1..=10).rev() {
        info!("Starting in {} seconds...", i);
        sleep(Duration::from_secs(1)).await;
    }
}

/// Future that resolves on Ctrl+C
pub fn shutdown_signal() -> impl Future<Output = ()> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    async move {
        let _ = shutdown_rx.recv().await;
    }
}

/// REST client for the configured mode; live trading requires credentials
pub fn build_client(config: &Config, mode: Mode) -> Result<BinanceClient> {
    let credentials = config.exchange.credentials();
    if mode == Mode::Live && credentials.is_none() {
        bail!("BINANCE_API_KEY and BINANCE_API_SECRET must be set for live trading");
    }
    BinanceClient::new(config.exchange.client_config(), credentials)
        .context("Failed to create Binance client")
}

/// Paper account seeded from the `paper` section
pub fn paper_exchange(client: BinanceClient, config: &Config) -> PaperExchange<BinanceClient> {
    let balances = config.paper.balances(&config.trading.symbol);
    info!(
        "[PAPER] Starting balances: {} {}, {} {}",
        config.paper.quote_balance,
        config.trading.symbol.quote,
        config.paper.base_balance,
        config.trading.symbol.base
    );
    PaperExchange::new(client, balances, config.exchange.taker_fee)
}
