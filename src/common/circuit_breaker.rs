//! Circuit breaker for exchange requests
//!
//! After `failure_threshold` consecutive failed requests the breaker opens and rejects
//! calls for `cooldown`; the first call after the cooldown is let through as a probe.
//! A successful probe closes the breaker, a failed one re-opens it.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may go out now
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    tracing::info!("Circuit breaker half-open, probing exchange");
                    self.state = CircuitState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        let trip = self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.config.failure_threshold;
        if trip && self.state != CircuitState::Open {
            tracing::warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
        if trip {
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
        }
    }

    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let mut cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let mut cb = breaker(2);
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown() {
        let mut cb = breaker(1);
        cb.record_failure();
        assert!(!cb.can_attempt());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // failed probe re-opens immediately
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_attempt());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let mut cb = breaker(1);
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_attempt());
    }
}
