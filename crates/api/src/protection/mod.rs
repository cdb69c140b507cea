//! Request protection: a circuit breaker and a per-client rate limiter.
//!
//! Both keep their counters behind a `Mutex` that is only held for the
//! counter update, never across an `.await`.

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use rate_limit::{RateDecision, RateLimiter};
