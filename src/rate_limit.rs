//! Per-client request budget
//!
//! Each client IP gets a fixed number of requests per window (10 000 per day
//! by default). The window starts with the client's first request and resets
//! once it has elapsed. Requests over budget get `429 Too Many Requests` with
//! `Retry-After`.
//!
//! Clients are keyed on the socket peer address. `X-Forwarded-For` and
//! `X-Real-IP` are client controlled and only consulted when the limiter is
//! told it sits behind a proxy that overwrites them.
//!
//! # Example
//!
//! ```ignore
//! use quillpost::rate_limit::{rate_limit_middleware, RateLimiter};
//!
//! let limiter = Arc::new(RateLimiter::per_day(10_000));
//! let app = Router::new()
//!     .route("/", get(home))
//!     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::AppError;
use crate::observability::SecurityEvent;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracked clients before expired windows are swept.
const SWEEP_THRESHOLD: usize = 4096;

// ============================================================================
// Rate Limiter Core
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u64,
    window: Duration,
    trust_proxy_headers: bool,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

/// Budget left after an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the window resets
    pub reset_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {retry_after_secs} seconds")]
    LimitExceeded { retry_after_secs: u64 },
}

impl RateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            trust_proxy_headers: false,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Key clients on proxy headers instead of the socket address.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn per_day(limit: u64) -> Self {
        Self::new(limit, DAY)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn check(&self, ip: IpAddr) -> Result<RateLimitStatus, RateLimitError> {
        self.check_at(ip, Instant::now())
    }

    /// Count one request from `ip` at `now`.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<RateLimitStatus, RateLimitError> {
        let mut clients = self.clients.lock();

        if clients.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }

        let entry = clients.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let elapsed = now.saturating_duration_since(entry.started);
        let reset_secs = self.window.saturating_sub(elapsed).as_secs().max(1);

        if entry.count >= self.limit {
            return Err(RateLimitError::LimitExceeded {
                retry_after_secs: reset_secs,
            });
        }

        entry.count += 1;
        Ok(RateLimitStatus {
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_secs,
        })
    }

    /// Forget all counters.
    pub fn reset(&self) {
        self.clients.lock().clear();
    }
}

// ============================================================================
// Axum Middleware
// ============================================================================

/// Client IP from the socket address. With `trust_proxy_headers`,
/// `X-Forwarded-For` then `X-Real-IP` take precedence.
pub fn extract_client_ip(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    let header_ip = |name: &str| -> Option<IpAddr> {
        let value = request.headers().get(name)?.to_str().ok()?;
        // leftmost entry is the original client
        value.split(',').next()?.trim().parse().ok()
    };

    let forwarded = if trust_proxy_headers {
        header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
    } else {
        None
    };

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Reject requests over budget and annotate the rest with `X-RateLimit-*`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, limiter.trust_proxy_headers);

    match limiter.check(ip) {
        Ok(status) => {
            debug!(
                ip = %ip,
                remaining = status.remaining,
                limit = status.limit,
                "Rate limit check passed"
            );

            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset_secs));
            response
        }
        Err(RateLimitError::LimitExceeded { retry_after_secs }) => {
            crate::security_event!(
                SecurityEvent::RateLimitExceeded,
                ip = %ip,
                path = %request.uri().path(),
                retry_after_secs = retry_after_secs,
                "Request rejected - rate limit exceeded"
            );
            AppError::rate_limited(retry_after_secs).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_budget_is_per_ip() {
        let limiter = RateLimiter::per_day(2);
        let now = Instant::now();

        assert_eq!(limiter.check_at(ip(1), now).unwrap().remaining, 1);
        assert_eq!(limiter.check_at(ip(1), now).unwrap().remaining, 0);
        assert!(limiter.check_at(ip(1), now).is_err());

        assert!(limiter.check_at(ip(2), now).is_ok());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at(ip(1), start).is_ok());
        let err = limiter
            .check_at(ip(1), start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(err, RateLimitError::LimitExceeded { retry_after_secs: 40 });

        assert!(limiter.check_at(ip(1), start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_reset_clears() {
        let limiter = RateLimiter::per_day(1);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        limiter.reset();
        assert!(limiter.check(ip(1)).is_ok());
    }

    fn peer_request(header: (&str, &str)) -> Request {
        let mut request = Request::builder()
            .header(header.0, header.1)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 4000))));
        request
    }

    #[test]
    fn test_extract_client_ip_uses_peer_address() {
        let peer = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9));

        let request = peer_request(("x-forwarded-for", "203.0.113.7, 10.0.0.1"));
        assert_eq!(extract_client_ip(&request, false), peer);
        let request = peer_request(("x-real-ip", "198.51.100.2"));
        assert_eq!(extract_client_ip(&request, false), peer);

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request, false), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_extract_client_ip_behind_proxy() {
        let request = peer_request(("x-forwarded-for", "203.0.113.7, 10.0.0.1"));
        assert_eq!(
            extract_client_ip(&request, true),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        let request = peer_request(("x-real-ip", "198.51.100.2"));
        assert_eq!(
            extract_client_ip(&request, true),
            "198.51.100.2".parse::<IpAddr>().unwrap()
        );

        let request = peer_request(("x-forwarded-for", "garbage"));
        assert_eq!(extract_client_ip(&request, true), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9)));
    }
}
