//! Authentication: password hashing, the login lockout guard, password
//! reset tokens and session tokens.

mod hasher;
mod lockout;
mod reset;
mod session;

pub use hasher::{Argon2Hasher, CredentialHasher, HashError};
pub use lockout::{
    AccountLocks, LockoutBoundary, LockoutPolicy, LockoutPolicyBuilder, LoginGuard, LoginOutcome,
    LoginRejection,
};
pub use reset::{
    PasswordResets, ResetTokenSigner, ResetVerification, TokenError, DEFAULT_RESET_TTL,
    RESET_AUDIENCE,
};
pub use session::{
    bearer_token, Anonymous, CurrentUser, IssuedSession, SessionClaims, SessionKeys,
    SESSION_AUDIENCE,
};

#[cfg(test)]
pub(crate) use hasher::cheap_hasher;

use thiserror::Error;

use crate::store::StoreError;

/// Failures of the guard and the reset flow. Rejections are not errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] HashError),
}
