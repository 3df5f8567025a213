//! Request signing for Binance signed endpoints
//!
//! Signed endpoints take an HMAC-SHA256 of the full query string, keyed with the API
//! secret and hex encoded, as the `signature` parameter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
/// Environment variable holding the API secret
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

/// Hex HMAC-SHA256 signature of `query`
///
/// ```
/// use kline_traders::exchange::auth::sign_query;
///
/// let signature = sign_query("symbol=ETHUSDC&timestamp=1", "secret");
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign_query(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_API_SECRET`; `None` when either is unset or empty
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok()?;
        let api_secret = std::env::var(API_SECRET_ENV).ok()?;
        if api_key.is_empty() || api_secret.is_empty() {
            return None;
        }
        Some(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn sign(&self, query: &str) -> String {
        sign_query(query, &self.api_secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}
