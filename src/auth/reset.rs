//! Password reset tokens
//!
//! A reset token is a signed JWT naming the account and its expiry. Nothing
//! is stored server-side: any number of tokens may be outstanding for one
//! account and each stays usable until it expires, including after another
//! token was used to reset the password.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hasher::{CredentialHasher, HashError};
use super::lockout::AccountLocks;
use super::AuthError;
use crate::models::Account;
use crate::observability::SecurityEvent;
use crate::secret::SigningSecret;
use crate::store::{AccountStore, StoreError};

/// Audience claim that marks a token as a reset token.
pub const RESET_AUDIENCE: &str = "password-reset";

/// Default validity of a reset token.
pub const DEFAULT_RESET_TTL: Duration = Duration::from_secs(1800);

/// Token signing failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
    #[error("token lifetime out of range")]
    Lifetime,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    /// Account id
    sub: String,
    iat: i64,
    exp: i64,
    aud: String,
}

/// Signs and checks reset tokens with HMAC-SHA-512.
#[derive(Clone)]
pub struct ResetTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for ResetTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResetTokenSigner {
    pub fn new(secret: &SigningSecret, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `account_id` that expires `ttl` after `now`.
    pub fn issue(&self, account_id: i64, now: DateTime<Utc>) -> Result<String, TokenError> {
        let ttl = TimeDelta::from_std(self.ttl).map_err(|_| TokenError::Lifetime)?;
        let exp = now.checked_add_signed(ttl).ok_or(TokenError::Lifetime)?;

        let claims = ResetClaims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            aud: RESET_AUDIENCE.to_string(),
        };

        Ok(encode(&Header::new(Algorithm::HS512), &claims, &self.encoding)?)
    }

    /// The account id inside a token that is authentic and unexpired at
    /// `now`, or `None`.
    pub fn account_id(&self, token: &str, now: DateTime<Utc>) -> Option<i64> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_audience(&[RESET_AUDIENCE]);
        // Expiry is checked against the caller's clock below.
        validation.validate_exp = false;

        let claims = decode::<ResetClaims>(token, &self.decoding, &validation)
            .ok()?
            .claims;

        if claims.exp < now.timestamp() {
            return None;
        }
        claims.sub.parse().ok()
    }
}

/// Result of checking a reset token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetVerification {
    Valid(Account),
    /// Bad signature, wrong purpose, expired, or the account is gone
    Invalid,
}

/// Reset flow over the account store.
pub struct PasswordResets {
    signer: ResetTokenSigner,
    accounts: Arc<dyn AccountStore>,
    hasher: Arc<dyn CredentialHasher>,
    locks: Arc<AccountLocks>,
}

impl PasswordResets {
    pub fn new(
        signer: ResetTokenSigner,
        accounts: Arc<dyn AccountStore>,
        hasher: Arc<dyn CredentialHasher>,
        locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            signer,
            accounts,
            hasher,
            locks,
        }
    }

    pub fn issue(&self, account: &Account, now: DateTime<Utc>) -> Result<String, TokenError> {
        let token = self.signer.issue(account.id, now)?;
        crate::security_event!(
            SecurityEvent::PasswordResetRequested,
            account_id = account.id,
            "Password reset token issued"
        );
        Ok(token)
    }

    /// Check a token and load its account. Only store failures are errors.
    pub async fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetVerification, StoreError> {
        let Some(account_id) = self.signer.account_id(token, now) else {
            crate::security_event!(
                SecurityEvent::PasswordResetRejected,
                "Invalid or expired reset token"
            );
            return Ok(ResetVerification::Invalid);
        };

        match self.accounts.find_by_id(account_id).await? {
            Some(account) => Ok(ResetVerification::Valid(account)),
            None => {
                crate::security_event!(
                    SecurityEvent::PasswordResetRejected,
                    account_id = account_id,
                    "Reset token names a missing account"
                );
                Ok(ResetVerification::Invalid)
            }
        }
    }

    /// Replace the password hash of `account_id`. No other field changes.
    pub async fn complete_reset(&self, account_id: i64, new_password: &str) -> Result<(), AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = new_password.to_owned();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| HashError::Task(e.to_string()))??;

        let _guard = self.locks.lock(account_id).await;
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        account.password_hash = hash;
        self.accounts.save(&account).await?;

        crate::security_event!(
            SecurityEvent::PasswordChanged,
            account_id = account_id,
            "Password reset completed"
        );
        Ok(())
    }
}
