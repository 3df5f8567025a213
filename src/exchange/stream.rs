//! Binance kline WebSocket feed
//!
//! The stream task owns the connection and forwards parsed kline events over an mpsc
//! channel. It reconnects with capped exponential backoff and exits once the receiver is
//! dropped.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::types::{event_time, WsKlineEvent};
use crate::error::ExchangeResult;
use crate::types::{Candle, Symbol};

/// Base URL for Binance spot market streams
pub const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";

/// One kline update; the same candle is reported repeatedly until `is_closed`
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: String,
    pub event_time: DateTime<Utc>,
    pub candle: Candle,
    pub is_closed: bool,
}

/// Parse a raw stream message; `Ok(None)` for anything that is not a kline event
pub fn parse_kline_message(text: &str) -> ExchangeResult<Option<KlineEvent>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|e| e.as_str()) != Some("kline") {
        return Ok(None);
    }

    let event: WsKlineEvent = serde_json::from_value(value)?;
    Ok(Some(KlineEvent {
        candle: event.kline.to_candle()?,
        event_time: event_time(event.event_time)?,
        is_closed: event.kline.is_closed,
        interval: event.kline.interval,
        symbol: event.symbol,
    }))
}

enum SessionEnd {
    ReceiverClosed,
    Disconnected { received: bool },
}

/// Reconnecting kline subscription for a single pair and interval
#[derive(Debug, Clone)]
pub struct KlineStream {
    url: String,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl KlineStream {
    pub fn new(ws_base: &str, symbol: &Symbol, interval: &str) -> Self {
        KlineStream {
            url: format!(
                "{}/ws/{}@kline_{}",
                ws_base.trim_end_matches('/'),
                symbol.pair().to_lowercase(),
                interval
            ),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run the stream on its own task
    pub fn spawn(self, tx: mpsc::Sender<KlineEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    pub async fn run(self, tx: mpsc::Sender<KlineEvent>) {
        let mut backoff = self.initial_backoff;

        loop {
            match self.session(&tx).await {
                Ok(SessionEnd::ReceiverClosed) => break,
                Ok(SessionEnd::Disconnected { received }) => {
                    if received {
                        backoff = self.initial_backoff;
                    }
                    warn!(url = %self.url, "Kline stream disconnected");
                }
                Err(e) => warn!(url = %self.url, "Kline stream error: {}", e),
            }

            info!("Reconnecting kline stream in {}ms", backoff.as_millis());
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = tx.closed() => break,
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }

        info!(url = %self.url, "Kline stream stopped");
    }

    async fn session(&self, tx: &mpsc::Sender<KlineEvent>) -> ExchangeResult<SessionEnd> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "Kline stream connected");

        let (mut write, mut read) = ws_stream.split();
        let mut received = false;

        loop {
            let message = tokio::select! {
                message = read.next() => message,
                _ = tx.closed() => return Ok(SessionEnd::ReceiverClosed),
            };

            match message {
                Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                    Ok(Some(event)) => {
                        received = true;
                        if tx.send(event).await.is_err() {
                            return Ok(SessionEnd::ReceiverClosed);
                        }
                    }
                    Ok(None) => debug!("Ignoring non-kline message"),
                    Err(e) => warn!("Skipping malformed kline message: {}", e),
                },
                Some(Ok(Message::Ping(payload))) => write.send(Message::Pong(payload)).await?,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed kline stream");
                    return Ok(SessionEnd::Disconnected { received });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Kline stream read error: {}", e);
                    return Ok(SessionEnd::Disconnected { received });
                }
                None => return Ok(SessionEnd::Disconnected { received }),
            }
        }
    }
}
