//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. Every section falls back to its defaults, so a
//! partial file (or none at all) is a valid configuration.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::exchange::auth::{API_KEY_ENV, API_SECRET_ENV};
use crate::exchange::{
    is_valid_interval, ClientConfig, Credentials, BINANCE_API_BASE, BINANCE_WS_BASE,
    MAX_KLINES_PER_REQUEST,
};
use crate::strategies::{GridTrendConfig, RsiThresholdConfig};
use crate::types::{Balances, Symbol};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub paper: PaperConfig,
    pub polling: PollingConfig,
    pub streaming: StreamingConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env_credentials();
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env_credentials();
                Ok(config)
            }
        }
    }

    /// Environment credentials take precedence over the file
    pub fn apply_env_credentials(&mut self) {
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var(API_SECRET_ENV) {
            self.exchange.api_secret = Some(api_secret);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.exchange.validate()?;
        self.trading.validate()?;
        self.paper.validate()?;
        self.polling.validate()?;
        self.streaming.validate()?;
        Ok(())
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub rest_url: String,
    pub ws_url: String,
    pub taker_fee: f64,
    /// Requests per second
    pub rate_limit: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            rest_url: BINANCE_API_BASE.to_string(),
            ws_url: BINANCE_WS_BASE.to_string(),
            taker_fee: 0.00075, // 0.075% with BNB discount
            rate_limit: 10,
            max_retries: 3,
            timeout_secs: 30,
            recv_window_ms: 5000,
        }
    }
}

impl ExchangeConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(key.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_base_url(self.rest_url.clone())
            .with_max_retries(self.max_retries)
            .with_rate_limit(self.rate_limit)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        config.recv_window_ms = self.recv_window_ms;
        config
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..0.1).contains(&self.taker_fee),
            "exchange.taker_fee must be within [0, 0.1), got {}",
            self.taker_fee
        );
        ensure!(self.timeout_secs > 0, "exchange.timeout_secs must be positive");
        ensure!(
            self.recv_window_ms > 0 && self.recv_window_ms <= 60_000,
            "exchange.recv_window_ms must be within 1..=60000"
        );
        Ok(())
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: Symbol,
    pub timeframe: String,
    /// Quote amount never spent on entries
    pub quote_reserve: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: Symbol::new("ETH", "USDC"),
            timeframe: "1m".to_string(),
            quote_reserve: 2.0,
        }
    }
}

impl TradingConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            is_valid_interval(&self.timeframe),
            "trading.timeframe '{}' is not a Binance interval",
            self.timeframe
        );
        ensure!(
            self.quote_reserve >= 0.0,
            "trading.quote_reserve cannot be negative"
        );
        Ok(())
    }
}

/// Starting balances of the simulated account used with `--paper`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub quote_balance: f64,
    pub base_balance: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            quote_balance: 1000.0,
            base_balance: 0.0,
        }
    }
}

impl PaperConfig {
    pub fn balances(&self, symbol: &Symbol) -> Balances {
        Balances::new()
            .with_asset(&symbol.quote, self.quote_balance)
            .with_asset(&symbol.base, self.base_balance)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.quote_balance >= 0.0 && self.base_balance >= 0.0,
            "paper balances cannot be negative"
        );
        Ok(())
    }
}

/// Polling bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Candles kept in the rolling window
    pub history_limit: u32,
    pub interval_secs: u64,
    /// Wait after a failed step
    pub retry_delay_secs: u64,
    pub strategy: RsiThresholdConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            history_limit: 100,
            interval_secs: 60,
            retry_delay_secs: 10,
            strategy: RsiThresholdConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    fn validate(&self) -> Result<()> {
        self.strategy.validate().context("invalid polling.strategy")?;
        ensure!(
            self.history_limit as usize > self.strategy.rsi_period
                && self.history_limit <= MAX_KLINES_PER_REQUEST,
            "polling.history_limit must exceed rsi_period and be at most {}",
            MAX_KLINES_PER_REQUEST
        );
        ensure!(self.interval_secs > 0, "polling.interval_secs must be positive");
        Ok(())
    }
}

/// Streaming bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Candles fetched over REST before the stream starts
    pub warmup_candles: u32,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    /// Market-close every open grid trade on shutdown
    pub close_on_shutdown: bool,
    pub strategy: GridTrendConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            warmup_candles: 200,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 60,
            close_on_shutdown: false,
            strategy: GridTrendConfig::default(),
        }
    }
}

impl StreamingConfig {
    fn validate(&self) -> Result<()> {
        self.strategy
            .validate()
            .context("invalid streaming.strategy")?;
        ensure!(
            self.warmup_candles as usize >= self.strategy.min_candles()
                && self.warmup_candles <= MAX_KLINES_PER_REQUEST,
            "streaming.warmup_candles must be within {}..={}",
            self.strategy.min_candles(),
            MAX_KLINES_PER_REQUEST
        );
        ensure!(
            self.reconnect_delay_secs > 0
                && self.reconnect_delay_secs <= self.max_reconnect_delay_secs,
            "streaming reconnect delays must satisfy 0 < initial <= max"
        );
        Ok(())
    }
}
