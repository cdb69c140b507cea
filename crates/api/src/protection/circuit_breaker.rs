//! Three-state circuit breaker.
//!
//! ```text
//! CLOSED --(failure_threshold consecutive failures)--> OPEN
//! OPEN --(recovery_timeout elapsed, checked on the next request)--> HALF_OPEN
//! HALF_OPEN --(success_threshold consecutive successes)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! ```
//!
//! The state machine takes the current [`Instant`] as an argument so tests
//! can script time. All requests are admitted while half-open.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use gloria_infra::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            success_threshold: cfg.success_threshold.max(1),
            recovery_timeout: cfg.recovery_timeout(),
        }
    }
}

/// Point-in-time view for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub times_opened: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    times_opened: u64,
    rejected: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                opened_at_utc: None,
                times_opened: 0,
                rejected: 0,
            }),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a request, or return how long until the breaker will try again.
    pub fn admit(&self, now: Instant) -> Result<(), Duration> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let opened_at = inner.opened_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(opened_at);
        if elapsed >= self.settings.recovery_timeout {
            info!("circuit breaker half-open");
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            return Ok(());
        }

        inner.rejected += 1;
        Err(self.settings.recovery_timeout - elapsed)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.settings.success_threshold {
                    info!("circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    inner.opened_at_utc = None;
                }
            }
            // Admitted before the breaker opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    warn!(failures = inner.consecutive_failures, "circuit breaker opened");
                    trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker re-opened after a half-open failure");
                trip(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at_utc,
            times_opened: inner.times_opened,
            rejected: inner.rejected,
        }
    }
}

fn trip(inner: &mut Inner, now: Instant) {
    inner.state = CircuitState::Open;
    inner.opened_at = Some(now);
    inner.opened_at_utc = Some(Utc::now());
    inner.consecutive_successes = 0;
    inner.times_opened += 1;
}

/// Fails fast with 503 while open; counts 5xx responses as failures.
pub async fn circuit_breaker(State(breaker): State<Arc<CircuitBreaker>>, req: Request, next: Next) -> Response {
    if let Err(retry_in) = breaker.admit(Instant::now()) {
        return open_response(retry_in);
    }

    let response = next.run(req).await;
    if response.status().is_server_error() {
        breaker.record_failure(Instant::now());
    } else {
        breaker.record_success();
    }
    response
}

fn open_response(retry_in: Duration) -> Response {
    let secs = retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0);
    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(serde_json::json!({
            "error": "circuit_open",
            "message": "service temporarily unavailable",
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let b = breaker();
        let t0 = Instant::now();

        b.record_failure(t0);
        b.record_failure(t0);
        b.record_success();
        b.record_failure(t0);
        b.record_failure(t0);
        assert_eq!(b.state(), CircuitState::Closed);

        b.record_failure(t0);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.admit(t0 + Duration::from_secs(10)), Err(Duration::from_secs(20)));
        assert_eq!(b.snapshot().rejected, 1);
    }

    #[test]
    fn half_open_closes_after_enough_successes() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0);
        }

        assert!(b.admit(t0 + Duration::from_secs(30)).is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timeout() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0);
        }

        let t1 = t0 + Duration::from_secs(31);
        assert!(b.admit(t1).is_ok());
        b.record_success();
        b.record_failure(t1);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().times_opened, 2);

        assert!(b.admit(t1 + Duration::from_secs(29)).is_err());
        assert!(b.admit(t1 + Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn late_results_while_open_are_ignored() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0);
        }
        b.record_success();
        b.record_failure(t0);
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.times_opened, 1);
    }
}
