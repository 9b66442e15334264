//! Security layer application for Axum routers
//!
//! Provides the `SecureRouter` trait that wraps the application router with
//! its hardening layers.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::Router;
use tower_http::{
    limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Extension trait for applying security layers to an Axum Router.
///
/// # Example
///
/// ```ignore
/// use quillpost::{SecureRouter, SecurityConfig};
/// use quillpost::rate_limit::RateLimiter;
///
/// let config = SecurityConfig::default();
/// let limiter = Arc::new(
///     RateLimiter::per_day(config.rate_limit_per_day)
///         .trust_proxy_headers(config.trust_proxy_headers),
/// );
/// let app = Router::new()
///     .route("/", get(handler))
///     .with_security(&config, limiter);
/// ```
pub trait SecureRouter {
    /// Apply all security layers based on the provided configuration.
    ///
    /// Layers, outermost first:
    /// 1. TraceLayer
    /// 2. Rate limiting
    /// 3. Security headers
    /// 4. Request body limit
    /// 5. Timeout
    fn with_security(self, config: &SecurityConfig, limiter: Arc<RateLimiter>) -> Self;
}

impl<S> SecureRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_security(self, config: &SecurityConfig, limiter: Arc<RateLimiter>) -> Self {
        let mut router = self;

        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ));

        router = router.layer(RequestBodyLimitLayer::new(config.max_request_size));

        if config.security_headers_enabled {
            router = router
                .layer(SetResponseHeaderLayer::overriding(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                // JSON only, nothing to load
                .layer(SetResponseHeaderLayer::overriding(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ));
        }

        if config.rate_limit_enabled {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        if config.tracing_enabled {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    fn app(config: &SecurityConfig) -> Router {
        let limiter = Arc::new(
            RateLimiter::per_day(config.rate_limit_per_day)
                .trust_proxy_headers(config.trust_proxy_headers),
        );
        Router::new()
            .route("/", get(|| async { "ok" }))
            .with_security(config, limiter)
    }

    /// `GET /` from one peer claiming to forward for `forwarded_for`.
    fn get_root_forwarded(forwarded_for: &str) -> Request<Body> {
        let mut request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 40], 51000))));
        request
    }

    fn get_root() -> Request<Body> {
        get_root_forwarded("203.0.113.5")
    }

    #[tokio::test]
    async fn test_security_headers_applied() {
        let response = app(&SecurityConfig::default()).oneshot(get_root()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_over_budget() {
        let config = SecurityConfig::builder().rate_limit_per_day(1).build();
        let app = app(&config);

        let first = app.clone().oneshot(get_root()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get_root()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_rate_limit_ignores_spoofed_forwarded_for() {
        let config = SecurityConfig::builder().rate_limit_per_day(1).build();
        let app = app(&config);

        let first = app.clone().oneshot(get_root_forwarded("203.0.113.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get_root_forwarded("203.0.113.2")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rate_limit_trusts_proxy_when_configured() {
        let config = SecurityConfig::builder()
            .rate_limit_per_day(1)
            .trust_proxy_headers(true)
            .build();
        let app = app(&config);

        for client in ["203.0.113.1", "203.0.113.2"] {
            let response = app.clone().oneshot(get_root_forwarded(client)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let repeat = app.oneshot(get_root_forwarded("203.0.113.1")).await.unwrap();
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rate_limit_can_be_disabled() {
        let config = SecurityConfig::builder()
            .rate_limit_per_day(1)
            .disable_rate_limiting()
            .build();
        let app = app(&config);

        for _ in 0..3 {
            let response = app.clone().oneshot(get_root()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-remaining"));
        }
    }
}
