//! Session tokens and the request extractors built on them.
//!
//! A successful login returns an HS256 JWT the client sends back as
//! `Authorization: Bearer <token>`. Logging out is client-side: the token is
//! discarded and expires on its own.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::reset::TokenError;
use crate::error::AppError;
use crate::models::Account;
use crate::secret::SigningSecret;
use crate::store::AccountStore;
use crate::AppState;

/// Audience claim that marks a token as a session token.
pub const SESSION_AUDIENCE: &str = "session";

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    /// Token id
    pub jti: String,
    pub aud: String,
}

impl SessionClaims {
    pub fn account_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// A freshly signed session.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and checks session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
    remember_lifetime: Duration,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("lifetime", &self.lifetime)
            .field("remember_lifetime", &self.remember_lifetime)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    pub fn new(secret: &SigningSecret, lifetime: Duration, remember_lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
            remember_lifetime,
        }
    }

    /// Sign a session for `account`. `remember` selects the long lifetime.
    pub fn issue(
        &self,
        account: &Account,
        remember: bool,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, TokenError> {
        let lifetime = if remember {
            self.remember_lifetime
        } else {
            self.lifetime
        };
        let lifetime = TimeDelta::from_std(lifetime).map_err(|_| TokenError::Lifetime)?;
        let expires_at = now.checked_add_signed(lifetime).ok_or(TokenError::Lifetime)?;

        let claims = SessionClaims {
            sub: account.id.to_string(),
            username: account.username.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            aud: SESSION_AUDIENCE.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedSession { token, expires_at })
    }

    /// Claims of an authentic session token unexpired at `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Option<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SESSION_AUDIENCE]);
        validation.validate_exp = false;

        let claims = decode::<SessionClaims>(token, &self.decoding, &validation)
            .ok()?
            .claims;

        (claims.exp >= now.timestamp()).then_some(claims)
    }
}

/// Token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolve the account behind the request's bearer token, if any.
async fn session_account(parts: &Parts, state: &AppState) -> Result<Option<Account>, AppError> {
    let Some(token) = bearer_token(&parts.headers) else {
        return Ok(None);
    };
    let Some(account_id) = state
        .sessions
        .validate(token, Utc::now())
        .and_then(|c| c.account_id())
    else {
        return Ok(None);
    };
    Ok(state.accounts.find_by_id(account_id).await?)
}

/// The logged-in account. Rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Account);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer_token(&parts.headers).is_none() {
            return Err(AppError::unauthorized("Please log in to access this page."));
        }
        session_account(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or_else(|| AppError::unauthorized("Invalid or expired session"))
    }
}

/// Guard for login, registration and reset routes: refuses callers that
/// already hold a valid session.
#[derive(Debug, Clone, Copy)]
pub struct Anonymous;

impl FromRequestParts<AppState> for Anonymous {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match session_account(parts, state).await? {
            Some(_) => Err(AppError::forbidden("Already logged in")),
            None => Ok(Anonymous),
        }
    }
}
