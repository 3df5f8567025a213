//! Exchange-layer error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} (code {code}): {msg}")]
    Api { status: u16, code: i64, msg: String },

    #[error("rate limited by exchange (HTTP {0})")]
    RateLimited(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("API credentials are required for {0}")]
    MissingCredentials(&'static str),

    #[error("circuit breaker is open, rejecting request")]
    CircuitOpen,

    #[error("insufficient {asset} balance: need {needed}, have {available}")]
    InsufficientBalance {
        asset: String,
        needed: f64,
        available: f64,
    },

    #[error("kline stream error: {0}")]
    Stream(String),

    #[error("order {client_order_id} outcome unknown: {reason}")]
    OrderStatusUnknown {
        client_order_id: String,
        reason: String,
    },

    #[error("order {client_order_id} ended {status} without fills")]
    OrderNotFilled {
        client_order_id: String,
        status: String,
    },
}

impl ExchangeError {
    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ExchangeError::Api { status, .. } => *status >= 500,
            ExchangeError::RateLimited(_) => true,
            ExchangeError::Stream(_) => true,
            ExchangeError::Decode(_)
            | ExchangeError::MissingCredentials(_)
            | ExchangeError::CircuitOpen
            | ExchangeError::InsufficientBalance { .. }
            | ExchangeError::OrderStatusUnknown { .. }
            | ExchangeError::OrderNotFilled { .. } => false,
        }
    }

    /// The request provably never reached the matching engine
    pub fn is_unsent(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_connect(),
            ExchangeError::RateLimited(_) => true,
            _ => false,
        }
    }

    /// Binance `-2013`: the queried order does not exist
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, ExchangeError::Api { code: -2013, .. })
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Stream(err.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
