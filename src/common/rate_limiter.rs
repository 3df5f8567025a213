//! Request pacing for exchange clients
//!
//! Spreads requests evenly: each call to [`RateLimiter::acquire`] reserves the next
//! free slot, `1 / requests_per_second` after the previous one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Rate limiter handing out evenly spaced request slots
///
/// # Example
///
/// ```
/// use kline_traders::common::RateLimiter;
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = RateLimiter::with_rate(10);
///     limiter.acquire().await;
///     // Make API request...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    spacing: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second` requests (0 disables pacing)
    pub fn with_rate(requests_per_second: u32) -> Self {
        let spacing = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / requests_per_second as f64)
        };
        Self::with_spacing(spacing)
    }

    pub fn with_spacing(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait for this caller's slot
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.spacing);
            slot
        };

        if slot > Instant::now() {
            sleep_until(slot).await;
        }
    }
}
