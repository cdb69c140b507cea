//! Fixed-window request limiter keyed per client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use gloria_infra::config::RateLimitConfig;

use crate::context::PrincipalContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
struct Windows {
    by_key: HashMap<String, Window>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.max_requests, cfg.window())
    }

    pub fn check(&self, key: &str, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(windows.last_sweep) >= self.window {
            let window = self.window;
            windows
                .by_key
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            windows.last_sweep = now;
        }

        let entry = windows.by_key.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(entry.started);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    /// Keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }
}

/// User id when authenticated, else the first `X-Forwarded-For` hop.
pub fn client_key(principal: Option<&PrincipalContext>, headers: &HeaderMap) -> String {
    if let Some(p) = principal {
        return format!("user:{}", p.user_id());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let key = client_key(req.extensions().get::<PrincipalContext>(), req.headers());

    match limiter.check(&key, Instant::now()) {
        RateDecision::Allowed { .. } => next.run(req).await,
        RateDecision::Limited { retry_after } => {
            debug!(client = %key, "rate limited");
            let secs = (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "error": "rate_limited",
                    "message": "too many requests",
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use gloria_auth::Principal;
    use gloria_core::UserId;

    use super::*;

    #[test]
    fn allows_limit_then_rejects_until_reset() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        assert_eq!(limiter.check("a", t0), RateDecision::Allowed { remaining: 2 });
        limiter.check("a", t0);
        assert_eq!(limiter.check("a", t0), RateDecision::Allowed { remaining: 0 });
        assert_eq!(
            limiter.check("a", t0 + Duration::from_secs(15)),
            RateDecision::Limited {
                retry_after: Duration::from_secs(45)
            }
        );

        // Other clients have their own window.
        assert!(matches!(limiter.check("b", t0), RateDecision::Allowed { .. }));

        assert_eq!(
            limiter.check("a", t0 + Duration::from_secs(60)),
            RateDecision::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn stale_windows_are_evicted() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let t0 = Instant::now();
        limiter.check("a", t0);
        limiter.check("b", t0);
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.check("c", t0 + Duration::from_secs(11));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn key_prefers_principal_then_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(None, &headers), "anonymous");

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.1.2.3, 172.16.0.1"));
        assert_eq!(client_key(None, &headers), "ip:10.1.2.3");

        let user = UserId::new();
        let principal = PrincipalContext::new(Principal::new(user));
        assert_eq!(client_key(Some(&principal), &headers), format!("user:{user}"));
    }
}
