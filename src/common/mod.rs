//! Common utilities for the exchange client
//!
//! - Circuit breaker pattern for fault tolerance
//! - Rate limiter spacing requests evenly

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::RateLimiter;
