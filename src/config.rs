//! Application configuration
//!
//! Everything is read from environment variables once at startup.
//! Durations accept `30s`, `5m`, `1h`, `365d` (bare numbers are seconds) and
//! sizes accept `512KB`, `1MB`.
//!
//! # Environment Variables
//!
//! | variable | default |
//! |---|---|
//! | `APP_ENV` | `development` |
//! | `SECRET_KEY` | required |
//! | `BIND_ADDR` | `0.0.0.0:5000` |
//! | `PUBLIC_BASE_URL` | `http://localhost:5000` |
//! | `RESET_TOKEN_TTL` | `30m` |
//! | `SESSION_LIFETIME` | `24h` |
//! | `REMEMBER_LIFETIME` | `365d` |
//! | `LOCKOUT_THRESHOLD` | `5` |
//! | `LOCKOUT_DURATION` | `30m` |
//! | `LOCKOUT_BOUNDARY` | `exceeded` |
//! | `RATE_LIMIT_PER_DAY` | `10000` |
//! | `RATE_LIMIT_ENABLED` | `true` |
//! | `REQUEST_TIMEOUT` | `30s` |
//! | `MAX_REQUEST_SIZE` | `1MB` |
//! | `SECURITY_HEADERS_ENABLED` | `true` |
//! | `TRACING_ENABLED` | `true` |
//! | `POSTS_PER_PAGE` | `5` |
//! | `MAIL_SENDER` | `noreply@blog.com` |
//! | `TRUST_PROXY_HEADERS` | `false` |
//!
//! Database settings live in [`DatabaseConfig`](crate::store::DatabaseConfig),
//! SMTP settings in [`SmtpConfig`](crate::mail::SmtpConfig).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{LockoutBoundary, LockoutPolicy, DEFAULT_RESET_TTL};
use crate::mail::{SmtpConfig, DEFAULT_SENDER};
use crate::pagination::DEFAULT_PER_PAGE;
use crate::parse::{parse_duration, parse_size};
use crate::secret::{SecretError, SecretPolicy, SigningSecret};

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("SECRET_KEY rejected: {0}")]
    Secret(#[from] SecretError),
}

// ============================================================================
// Environment helpers
// ============================================================================

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}

/// Parse `var` with `FromStr`, or return `default` when unset.
pub(crate) fn env_parse<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, value.clone(), e.to_string())),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_duration(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(value) => {
            parse_duration(&value).ok_or_else(|| invalid(var, value, "expected a duration like 30s or 5m"))
        }
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_size(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(value) => parse_size(&value).ok_or_else(|| invalid(var, value, "expected a size like 1MB")),
        Err(_) => Ok(default),
    }
}

/// Anything but `false` (case-insensitive) counts as true.
pub(crate) fn env_flag(var: &'static str, default: bool) -> bool {
    std::env::var(var)
        .map(|s| !s.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}

// ============================================================================
// HTTP hardening
// ============================================================================

/// Settings for the middleware stack applied by
/// [`SecureRouter::with_security`](crate::layers::SecureRouter::with_security).
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    pub request_timeout: Duration,
    /// Requests allowed per client IP per day
    pub rate_limit_per_day: u64,
    /// Set to false for testing only
    pub rate_limit_enabled: bool,
    pub security_headers_enabled: bool,
    pub tracing_enabled: bool,
    /// Key the rate limiter on `X-Forwarded-For`/`X-Real-IP`. Only safe
    /// behind a proxy that overwrites them.
    pub trust_proxy_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            rate_limit_per_day: 10_000,
            rate_limit_enabled: true,
            security_headers_enabled: true,
            tracing_enabled: true,
            trust_proxy_headers: false,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_request_size: env_size("MAX_REQUEST_SIZE", defaults.max_request_size)?,
            request_timeout: env_duration("REQUEST_TIMEOUT", defaults.request_timeout)?,
            rate_limit_per_day: env_parse("RATE_LIMIT_PER_DAY", defaults.rate_limit_per_day)?,
            rate_limit_enabled: env_flag("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            security_headers_enabled: env_flag(
                "SECURITY_HEADERS_ENABLED",
                defaults.security_headers_enabled,
            ),
            tracing_enabled: env_flag("TRACING_ENABLED", defaults.tracing_enabled),
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,
        })
    }

    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::default()
    }
}

/// Builder for SecurityConfig
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    config: SecurityConfig,
}

impl SecurityConfigBuilder {
    pub fn max_request_size(mut self, size: usize) -> Self {
        self.config.max_request_size = size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn rate_limit_per_day(mut self, limit: u64) -> Self {
        self.config.rate_limit_per_day = limit;
        self
    }

    /// Disable rate limiting (for testing only!).
    pub fn disable_rate_limiting(mut self) -> Self {
        self.config.rate_limit_enabled = false;
        self
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.config.trust_proxy_headers = trust;
        self
    }

    pub fn disable_tracing(mut self) -> Self {
        self.config.tracing_enabled = false;
        self
    }

    pub fn build(self) -> SecurityConfig {
        self.config
    }
}

// ============================================================================
// Application
// ============================================================================

/// Application settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    /// Signs session and reset tokens
    pub secret: SigningSecret,
    pub bind_addr: SocketAddr,
    /// Prefix for absolute links in emails
    pub public_base_url: String,
    pub reset_token_ttl: Duration,
    pub session_lifetime: Duration,
    /// Session lifetime when the client asks to be remembered
    pub remember_lifetime: Duration,
    pub lockout: LockoutPolicy,
    pub posts_per_page: u32,
    pub mail_sender: String,
    /// Relay for outbound mail; without one mail is only logged
    pub smtp: Option<SmtpConfig>,
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Defaults around an already validated secret.
    pub fn new(secret: SigningSecret) -> Self {
        Self {
            environment: "development".to_string(),
            secret,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            public_base_url: "http://localhost:5000".to_string(),
            reset_token_ttl: DEFAULT_RESET_TTL,
            session_lifetime: Duration::from_secs(24 * 60 * 60),
            remember_lifetime: Duration::from_secs(365 * 24 * 60 * 60),
            lockout: LockoutPolicy::default(),
            posts_per_page: DEFAULT_PER_PAGE,
            mail_sender: DEFAULT_SENDER.to_string(),
            smtp: None,
            security: SecurityConfig::default(),
        }
    }

    /// Load from the environment. `SECRET_KEY` is checked against the
    /// [`SecretPolicy`] for `APP_ENV`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let raw_secret = std::env::var("SECRET_KEY").map_err(|_| ConfigError::Missing("SECRET_KEY"))?;
        let secret = SigningSecret::new(raw_secret, &SecretPolicy::for_environment(&environment))?;

        let defaults = Self::new(secret);
        let default_lockout = LockoutPolicy::default();

        let lockout = LockoutPolicy::builder()
            .threshold(env_parse("LOCKOUT_THRESHOLD", default_lockout.threshold)?)
            .lockout_duration(env_duration("LOCKOUT_DURATION", default_lockout.lockout_duration)?)
            .boundary(env_parse::<LockoutBoundary>("LOCKOUT_BOUNDARY", default_lockout.boundary)?)
            .build();

        let posts_per_page = env_parse("POSTS_PER_PAGE", defaults.posts_per_page)?;
        if posts_per_page == 0 {
            return Err(invalid("POSTS_PER_PAGE", "0".into(), "must be at least 1"));
        }

        Ok(Self {
            environment,
            bind_addr: env_parse("BIND_ADDR", defaults.bind_addr)?,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            reset_token_ttl: env_duration("RESET_TOKEN_TTL", defaults.reset_token_ttl)?,
            session_lifetime: env_duration("SESSION_LIFETIME", defaults.session_lifetime)?,
            remember_lifetime: env_duration("REMEMBER_LIFETIME", defaults.remember_lifetime)?,
            lockout,
            posts_per_page,
            mail_sender: std::env::var("MAIL_SENDER").unwrap_or(defaults.mail_sender),
            smtp: SmtpConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            secret: defaults.secret,
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }
}
