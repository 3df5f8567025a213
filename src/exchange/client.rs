//! Binance spot REST client
//!
//! Public market data needs no API key; account and order endpoints are signed with
//! [`Credentials`]. Every request is paced by a [`RateLimiter`], guarded by a
//! [`CircuitBreaker`] and retried with exponential backoff when the failure is transient.
//!
//! # Example
//! ```no_run
//! use kline_traders::exchange::{BinanceClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceClient::new(ClientConfig::default(), None)?;
//!     let klines = client.get_klines("ETHUSDC", "1m", 100).await?;
//!     println!("Fetched {} klines", klines.len());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use itertools::Itertools;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::Credentials;
use super::types::{AccountInfo, ApiErrorBody, BinanceKline, ExchangeInfo, OrderResponse};
use super::Exchange;
use crate::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter};
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{Balances, Candle, MarketRules, OrderReceipt, OrderRequest, Symbol};

/// Base URL for Binance spot API
pub const BINANCE_API_BASE: &str = "https://api.binance.com";

/// Maximum klines per request (Binance limit)
pub const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Validity window for signed requests
    pub recv_window_ms: u64,
    pub max_retries: u32,
    /// First backoff delay, doubled on every retry
    pub retry_base_delay: Duration,
    pub timeout: Duration,
    pub requests_per_second: u32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_BASE.to_string(),
            recv_window_ms: 5000,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            requests_per_second: 10,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }
}

/// Binance spot API client
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    config: ClientConfig,
    credentials: Option<Credentials>,
    rate_limiter: RateLimiter,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
}

impl BinanceClient {
    /// Create a client; without credentials only public endpoints work
    pub fn new(config: ClientConfig, credentials: Option<Credentials>) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(BinanceClient {
            http,
            rate_limiter: RateLimiter::with_rate(config.requests_per_second),
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                config.circuit_breaker.clone(),
            ))),
            credentials,
            config,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.lock().await.state()
    }

    /// Run `operation` behind the breaker and rate limiter, retrying transient failures
    async fn execute_with_retry<F, Fut, T>(&self, what: &str, operation: F) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        if !self.circuit_breaker.lock().await.can_attempt() {
            return Err(ExchangeError::CircuitOpen);
        }

        let mut attempt = 0u32;
        loop {
            self.rate_limiter.acquire().await;

            match operation().await {
                Ok(value) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt);
                    warn!(
                        request = what,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_retries + 1,
                        "Request failed: {}; retrying in {}ms",
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        self.circuit_breaker.lock().await.record_failure();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Send a request and decode the JSON body, mapping Binance error payloads
    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> ExchangeResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited(status.as_u16()));
        }

        if !status.is_success() {
            let (code, msg) = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => (err.code, err.msg),
                Err(_) => (0, body),
            };
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                code,
                msg,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{}: {}", e, body)))
    }

    /// Build a signed request; timestamp and signature are fresh on every call
    fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<RequestBuilder> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials("signed endpoints"))?;

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let recv_window = self.config.recv_window_ms.to_string();
        let query = params
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .chain([("recvWindow", recv_window.as_str()), ("timestamp", timestamp.as_str())])
            .map(|(k, v)| format!("{}={}", k, v))
            .join("&");
        let signature = credentials.sign(&query);

        let url = format!(
            "{}{}?{}&signature={}",
            self.config.base_url, path, query, signature
        );
        Ok(self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", credentials.api_key()))
    }

    /// Fetch the latest klines (candlestick data), oldest first
    pub async fn get_klines(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<BinanceKline>> {
        let url = format!("{}/api/v3/klines", self.config.base_url);
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let params = [
            ("symbol", pair.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];

        debug!(pair, interval, limit, "Fetching klines");

        let raw: Vec<Vec<serde_json::Value>> = self
            .execute_with_retry("klines", || Self::send(self.http.get(&url).query(&params)))
            .await?;

        Ok(raw.iter().filter_map(|row| BinanceKline::from_raw(row)).collect())
    }

    /// Fetch account balances (signed)
    pub async fn get_account(&self) -> ExchangeResult<AccountInfo> {
        let this = self;
        self.execute_with_retry("account", move || async move {
            let request = this.signed_request(Method::GET, "/api/v3/account", &[])?;
            Self::send(request).await
        })
        .await
    }

    /// Place a market order (signed)
    ///
    /// Only failures that never reached the matching engine (429/418, connection refused)
    /// are resent. A 5xx or timeout leaves the outcome unknown, so the order is looked up
    /// by its client order id instead of being sent again.
    pub async fn place_market_order(&self, order: &OrderRequest) -> ExchangeResult<OrderResponse> {
        let params = [
            ("symbol", order.symbol.pair()),
            ("side", order.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("newClientOrderId", order.client_order_id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ];

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            client_order_id = %order.client_order_id,
            "Placing market order"
        );

        if !self.circuit_breaker.lock().await.can_attempt() {
            return Err(ExchangeError::CircuitOpen);
        }

        let mut attempt = 0u32;
        loop {
            self.rate_limiter.acquire().await;

            let result = match self.signed_request(Method::POST, "/api/v3/order", &params) {
                Ok(request) => Self::send::<OrderResponse>(request).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(response) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(response);
                }
                Err(e) if e.is_unsent() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt);
                    warn!(
                        request = "order",
                        attempt = attempt + 1,
                        max_attempts = self.config.max_retries + 1,
                        "Order not accepted: {}; resending in {}ms",
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() && !e.is_unsent() => {
                    return self.reconcile_order(order, e).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        self.circuit_breaker.lock().await.record_failure();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Resolve an order whose POST failed ambiguously
    ///
    /// Returns the exchange's record when the order exists, the original error when
    /// the exchange never saw it.
    async fn reconcile_order(
        &self,
        order: &OrderRequest,
        cause: ExchangeError,
    ) -> ExchangeResult<OrderResponse> {
        warn!(
            client_order_id = %order.client_order_id,
            "Order outcome unknown after '{}'; querying the exchange", cause
        );

        match self
            .get_order(&order.symbol.pair(), &order.client_order_id)
            .await
        {
            Ok(found) => {
                let unfilled = matches!(
                    found.status.as_str(),
                    "CANCELED" | "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH"
                );
                if unfilled && parse_qty(&found.executed_qty) <= 0.0 {
                    return Err(ExchangeError::OrderNotFilled {
                        client_order_id: found.client_order_id,
                        status: found.status,
                    });
                }
                info!(
                    client_order_id = %found.client_order_id,
                    status = %found.status,
                    executed_qty = %found.executed_qty,
                    "Recovered order after failed placement"
                );
                Ok(found)
            }
            Err(e) if e.is_unknown_order() => {
                self.circuit_breaker.lock().await.record_failure();
                Err(cause)
            }
            Err(e) => Err(ExchangeError::OrderStatusUnknown {
                client_order_id: order.client_order_id.clone(),
                reason: format!("{}; lookup failed: {}", cause, e),
            }),
        }
    }

    /// Look up an order by its client order id (signed)
    ///
    /// The response carries no fills, so commission is unknown for orders found this way.
    pub async fn get_order(
        &self,
        pair: &str,
        client_order_id: &str,
    ) -> ExchangeResult<OrderResponse> {
        let params = [
            ("symbol", pair.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        let (this, params) = (self, &params);
        self.execute_with_retry("orderQuery", move || async move {
            let request = this.signed_request(Method::GET, "/api/v3/order", params)?;
            Self::send(request).await
        })
        .await
    }

    /// Trading rules for a single pair
    pub async fn get_exchange_info(&self, pair: &str) -> ExchangeResult<ExchangeInfo> {
        let url = format!("{}/api/v3/exchangeInfo", self.config.base_url);
        let params = [("symbol", pair.to_string())];
        self.execute_with_retry("exchangeInfo", || {
            Self::send(self.http.get(&url).query(&params))
        })
        .await
    }

    /// Check server connectivity
    pub async fn ping(&self) -> ExchangeResult<()> {
        let url = format!("{}/api/v3/ping", self.config.base_url);
        let _: serde_json::Value = self
            .execute_with_retry("ping", || Self::send(self.http.get(&url)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let klines = self.get_klines(&symbol.pair(), interval, limit).await?;
        Ok(klines.iter().filter_map(BinanceKline::to_candle).collect())
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        self.get_account().await?.to_balances()
    }

    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<OrderReceipt> {
        self.place_market_order(order).await?.to_receipt()
    }

    async fn market_rules(&self, symbol: &Symbol) -> ExchangeResult<MarketRules> {
        let pair = symbol.pair();
        let info = self.get_exchange_info(&pair).await?;
        info.symbols
            .iter()
            .find(|s| s.symbol == pair)
            .ok_or_else(|| ExchangeError::Decode(format!("no exchange info for {}", pair)))?
            .to_market_rules()
    }
}

fn parse_qty(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}
