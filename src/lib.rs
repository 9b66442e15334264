//! # quillpost
//!
//! A small blog service on Axum and PostgreSQL. Accounts are protected by a
//! login lockout guard and can recover access through signed, time-limited
//! password reset tokens.
//!
//! ## Features
//!
//! - **Lockout**: consecutive failed logins lock an account for a fixed period
//! - **Password reset**: HS512 tokens mailed as absolute links
//! - **Sessions**: HS256 bearer tokens with an optional long "remember" lifetime
//! - **Posts**: paginated listings, author-only edits
//! - **Hardening**: per-IP daily request budget, body limit, timeout, security headers
//! - **Structured logging**: `tracing` with a uniform security event vocabulary
//!
//! ## Quick Start
//!
//! ```ignore
//! use quillpost::{build_router, AppConfig, AppState};
//! use quillpost::auth::Argon2Hasher;
//! use quillpost::mail::LogMailer;
//! use quillpost::store::MemoryStore;
//!
//! let config = AppConfig::from_env()?;
//! let store = Arc::new(MemoryStore::new());
//! let state = AppState::new(
//!     config,
//!     store.clone(),
//!     store,
//!     Arc::new(Argon2Hasher::default()),
//!     Arc::new(LogMailer),
//! );
//! let app = build_router(state);
//! ```

use std::sync::Arc;

use axum::Router;

pub mod auth;
pub mod config;
pub mod error;
mod layers;
pub mod mail;
pub mod models;
pub mod observability;
pub mod pagination;
mod parse;
pub mod rate_limit;
pub mod routes;
pub mod secret;
pub mod store;
pub mod validation;

// Re-exports
pub use config::{AppConfig, ConfigError, SecurityConfig, SecurityConfigBuilder};
pub use error::{AppError, ErrorKind};
pub use layers::SecureRouter;
pub use parse::{parse_duration, parse_size};

use auth::{
    AccountLocks, CredentialHasher, LoginGuard, PasswordResets, ResetTokenSigner, SessionKeys,
};
use mail::MailSender;
use rate_limit::RateLimiter;
use store::{AccountStore, PostStore};

/// Shared handler state.
///
/// The login guard, the reset flow and account updates share one
/// [`AccountLocks`] table so their read-modify-write sequences on the same
/// account never interleave.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountStore>,
    pub posts: Arc<dyn PostStore>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub locks: Arc<AccountLocks>,
    pub guard: Arc<LoginGuard>,
    pub resets: Arc<PasswordResets>,
    pub sessions: SessionKeys,
    pub mailer: Arc<dyn MailSender>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        accounts: Arc<dyn AccountStore>,
        posts: Arc<dyn PostStore>,
        hasher: Arc<dyn CredentialHasher>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        let locks = Arc::new(AccountLocks::new());

        let guard = LoginGuard::with_locks(
            Arc::clone(&accounts),
            Arc::clone(&hasher),
            config.lockout.clone(),
            Arc::clone(&locks),
        );
        let resets = PasswordResets::new(
            ResetTokenSigner::new(&config.secret, config.reset_token_ttl),
            Arc::clone(&accounts),
            Arc::clone(&hasher),
            Arc::clone(&locks),
        );
        let sessions = SessionKeys::new(
            &config.secret,
            config.session_lifetime,
            config.remember_lifetime,
        );
        let limiter = Arc::new(
            RateLimiter::per_day(config.security.rate_limit_per_day)
                .trust_proxy_headers(config.security.trust_proxy_headers),
        );

        Self {
            config: Arc::new(config),
            accounts,
            posts,
            hasher,
            locks,
            guard: Arc::new(guard),
            resets: Arc::new(resets),
            sessions,
            mailer,
            limiter,
        }
    }
}

/// The complete application: every route behind the security layers.
pub fn build_router(state: AppState) -> Router {
    let security = state.config.security.clone();
    let limiter = Arc::clone(&state.limiter);

    routes::router()
        .with_state(state)
        .with_security(&security, limiter)
}
