//! Account lockout guard
//!
//! Every login attempt goes through [`LoginGuard::attempt_login`], which
//! decides between accepting, rejecting and counting, or rejecting and
//! locking. The counter and lock deadline live on the account record, so
//! they survive restarts and are shared by every process using the store.
//!
//! # Lock boundary
//!
//! With the default [`LockoutBoundary::Exceeded`] a wrong password only locks
//! once the stored counter is already *above* the threshold. For the default
//! threshold of 5 that means six counted failures, then the seventh failure
//! sets the lock. [`LockoutBoundary::Reached`] locks as soon as the counter
//! has reached the threshold (the sixth failure).
//!
//! # Usage
//!
//! ```ignore
//! use quillpost::auth::{LoginGuard, LoginOutcome, LockoutPolicy};
//!
//! let guard = LoginGuard::new(accounts, hasher, LockoutPolicy::default());
//! match guard.attempt_login("corey@blog.com", "hunter22", Utc::now()).await? {
//!     LoginOutcome::Accepted(account) => { /* issue session */ }
//!     LoginOutcome::Rejected(reason) => { /* report reason */ }
//! }
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::hasher::CredentialHasher;
use super::AuthError;
use crate::models::Account;
use crate::observability::SecurityEvent;
use crate::store::AccountStore;

// ============================================================================
// Lockout Policy
// ============================================================================

/// When a failed attempt turns into a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockoutBoundary {
    /// Lock when the stored counter is greater than the threshold
    #[default]
    Exceeded,
    /// Lock when the stored counter is at least the threshold
    Reached,
}

impl FromStr for LockoutBoundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exceeded" => Ok(Self::Exceeded),
            "reached" => Ok(Self::Reached),
            other => Err(format!("expected 'exceeded' or 'reached', got '{other}'")),
        }
    }
}

/// Lockout policy configuration
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Failed attempts tolerated before the boundary applies
    pub threshold: u32,

    /// How long a lock lasts
    pub lockout_duration: Duration,

    pub boundary: LockoutBoundary,
}

impl Default for LockoutPolicy {
    /// Threshold 5, 30 minute lock, [`LockoutBoundary::Exceeded`].
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_duration: Duration::from_secs(30 * 60),
            boundary: LockoutBoundary::Exceeded,
        }
    }
}

impl LockoutPolicy {
    pub fn builder() -> LockoutPolicyBuilder {
        LockoutPolicyBuilder::default()
    }

    /// Whether a wrong password against an account with `count` stored
    /// failures should lock it instead of counting.
    pub fn should_lock(&self, count: u32) -> bool {
        match self.boundary {
            LockoutBoundary::Exceeded => count > self.threshold,
            LockoutBoundary::Reached => count >= self.threshold,
        }
    }

    /// Further counted failures allowed once the counter is at `count`.
    pub fn attempts_remaining(&self, count: u32) -> u32 {
        match self.boundary {
            LockoutBoundary::Exceeded => (self.threshold + 1).saturating_sub(count),
            LockoutBoundary::Reached => self.threshold.saturating_sub(count),
        }
    }

    /// Deadline for a lock starting at `now`.
    pub fn lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.lockout_duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Builder for LockoutPolicy
#[derive(Debug, Clone, Default)]
pub struct LockoutPolicyBuilder {
    policy: LockoutPolicy,
}

impl LockoutPolicyBuilder {
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.policy.threshold = threshold;
        self
    }

    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.lockout_duration = duration;
        self
    }

    pub fn boundary(mut self, boundary: LockoutBoundary) -> Self {
        self.policy.boundary = boundary;
        self
    }

    pub fn build(self) -> LockoutPolicy {
        self.policy
    }
}

// ============================================================================
// Per-account serialization
// ============================================================================

/// In-process mutex per account id.
///
/// Holding the guard makes a read-modify-write of one account record
/// exclusive among tasks in this process. Entries nobody holds or waits on
/// are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(account_id).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Entries currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Why a login attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRejection {
    /// No account has this email
    NoSuchAccount,
    /// Locked until the given instant, password not checked
    AccountLocked { until: DateTime<Utc> },
    /// Wrong password; the counter was incremented
    BadCredentials { attempts_remaining: u32 },
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted(Account),
    Rejected(LoginRejection),
}

/// Decides login attempts and maintains the lockout state on accounts.
pub struct LoginGuard {
    accounts: Arc<dyn AccountStore>,
    hasher: Arc<dyn CredentialHasher>,
    policy: LockoutPolicy,
    locks: Arc<AccountLocks>,
}

impl LoginGuard {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        hasher: Arc<dyn CredentialHasher>,
        policy: LockoutPolicy,
    ) -> Self {
        Self::with_locks(accounts, hasher, policy, Arc::new(AccountLocks::new()))
    }

    /// Share the lock table with other writers of account records.
    pub fn with_locks(
        accounts: Arc<dyn AccountStore>,
        hasher: Arc<dyn CredentialHasher>,
        policy: LockoutPolicy,
        locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            accounts,
            hasher,
            policy,
            locks,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Evaluate one login attempt at `now`.
    ///
    /// Every outcome except [`LoginRejection::NoSuchAccount`] and a rejection
    /// during an active lock persists the account.
    pub async fn attempt_login(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, AuthError> {
        let Some(found) = self.accounts.find_by_email(email).await? else {
            log_unknown_account(email);
            return Ok(LoginOutcome::Rejected(LoginRejection::NoSuchAccount));
        };

        let _guard = self.locks.lock(found.id).await;

        // Re-read under the lock; another attempt may have just written.
        let Some(mut account) = self.accounts.find_by_id(found.id).await? else {
            return Ok(LoginOutcome::Rejected(LoginRejection::NoSuchAccount));
        };

        if let Some(until) = account.locked_until {
            if now > until {
                account.failed_attempt_count = 0;
                account.locked_until = None;
                log_account_unlocked(&account);
            } else {
                log_login_blocked(&account, until);
                return Ok(LoginOutcome::Rejected(LoginRejection::AccountLocked { until }));
            }
        }

        if self.verify(password, &account.password_hash).await? {
            account.failed_attempt_count = 0;
            self.accounts.save(&account).await?;
            log_login_success(&account);
            return Ok(LoginOutcome::Accepted(account));
        }

        if self.policy.should_lock(account.failed_attempt_count) {
            let until = self.policy.lock_until(now);
            account.locked_until = Some(until);
            self.accounts.save(&account).await?;
            log_account_locked(&account, self.policy.lockout_duration);
            return Ok(LoginOutcome::Rejected(LoginRejection::AccountLocked { until }));
        }

        account.failed_attempt_count += 1;
        self.accounts.save(&account).await?;

        let attempts_remaining = self.policy.attempts_remaining(account.failed_attempt_count);
        log_login_failure(&account, attempts_remaining);
        Ok(LoginOutcome::Rejected(LoginRejection::BadCredentials {
            attempts_remaining,
        }))
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Hash(super::HashError::Task(e.to_string())))
    }
}

// ============================================================================
// Security Event Logging
// ============================================================================

fn log_login_success(account: &Account) {
    crate::security_event!(
        SecurityEvent::AuthenticationSuccess,
        account_id = account.id,
        "Login successful"
    );
}

fn log_login_failure(account: &Account, remaining: u32) {
    crate::security_event!(
        SecurityEvent::AuthenticationFailure,
        account_id = account.id,
        failed_count = account.failed_attempt_count,
        remaining_attempts = remaining,
        "Login failed"
    );
}

fn log_unknown_account(email: &str) {
    crate::security_event!(
        SecurityEvent::AuthenticationFailure,
        email = %email,
        "Login attempt for unknown account"
    );
}

fn log_login_blocked(account: &Account, until: DateTime<Utc>) {
    crate::security_event!(
        SecurityEvent::AuthenticationFailure,
        account_id = account.id,
        locked_until = %until,
        "Login attempt blocked - account locked"
    );
}

fn log_account_locked(account: &Account, duration: Duration) {
    crate::security_event!(
        SecurityEvent::AccountLocked,
        account_id = account.id,
        failed_count = account.failed_attempt_count,
        lockout_duration_secs = duration.as_secs(),
        "Account locked due to failed login attempts"
    );
}

fn log_account_unlocked(account: &Account) {
    crate::security_event!(
        SecurityEvent::AccountUnlocked,
        account_id = account.id,
        "Expired account lock cleared"
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hasher::cheap_hasher;
    use crate::models::NewAccount;
    use crate::store::MemoryStore;

    const EMAIL: &str = "corey@blog.com";
    const PASSWORD: &str = "correct horse";

    async fn setup(policy: LockoutPolicy) -> (Arc<MemoryStore>, LoginGuard, Account) {
        let store = Arc::new(MemoryStore::new());
        let hasher = Arc::new(cheap_hasher());
        let account = store
            .insert(NewAccount {
                username: "corey".into(),
                email: EMAIL.into(),
                password_hash: hasher.hash(PASSWORD).unwrap(),
            })
            .await
            .unwrap();
        let guard = LoginGuard::new(store.clone(), hasher, policy);
        (store, guard, account)
    }

    async fn set_state(
        store: &MemoryStore,
        id: i64,
        count: u32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Account {
        let mut account = store.find_by_id(id).await.unwrap().unwrap();
        account.failed_attempt_count = count;
        account.locked_until = locked_until;
        store.save(&account).await.unwrap();
        account
    }

    async fn reload(store: &MemoryStore, id: i64) -> Account {
        store.find_by_id(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_policy_boundaries() {
        let exceeded = LockoutPolicy::default();
        assert!(!exceeded.should_lock(5));
        assert!(exceeded.should_lock(6));

        let reached = LockoutPolicy::builder()
            .boundary(LockoutBoundary::Reached)
            .build();
        assert!(!reached.should_lock(4));
        assert!(reached.should_lock(5));
    }

    #[test]
    fn test_boundary_parse() {
        assert_eq!("Reached".parse::<LockoutBoundary>(), Ok(LockoutBoundary::Reached));
        assert_eq!("exceeded".parse::<LockoutBoundary>(), Ok(LockoutBoundary::Exceeded));
        assert!("never".parse::<LockoutBoundary>().is_err());
    }

    #[tokio::test]
    async fn test_unknown_email_is_rejected_without_mutation() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let outcome = guard
            .attempt_login("nobody@blog.com", PASSWORD, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Rejected(LoginRejection::NoSuchAccount));
        assert_eq!(reload(&store, account.id).await, account);
    }

    #[tokio::test]
    async fn test_correct_password_accepts_and_keeps_counter_zero() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let outcome = guard.attempt_login(EMAIL, PASSWORD, Utc::now()).await.unwrap();

        assert!(matches!(outcome, LoginOutcome::Accepted(ref a) if a.id == account.id));
        assert_eq!(reload(&store, account.id).await.failed_attempt_count, 0);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        set_state(&store, account.id, 4, None).await;

        let outcome = guard.attempt_login(EMAIL, PASSWORD, Utc::now()).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Accepted(_)));
        assert_eq!(reload(&store, account.id).await.failed_attempt_count, 0);
    }

    #[tokio::test]
    async fn test_wrong_password_counts_up() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;

        for n in 0..6u32 {
            set_state(&store, account.id, n, None).await;
            let outcome = guard.attempt_login(EMAIL, "wrong", Utc::now()).await.unwrap();

            assert_eq!(
                outcome,
                LoginOutcome::Rejected(LoginRejection::BadCredentials {
                    attempts_remaining: 5 - n
                })
            );
            let after = reload(&store, account.id).await;
            assert_eq!(after.failed_attempt_count, n + 1);
            assert!(after.locked_until.is_none());
        }
    }

    #[tokio::test]
    async fn test_seventh_failure_locks_by_default() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let now = Utc::now();

        for _ in 0..6 {
            let outcome = guard.attempt_login(EMAIL, "wrong", now).await.unwrap();
            assert!(matches!(
                outcome,
                LoginOutcome::Rejected(LoginRejection::BadCredentials { .. })
            ));
        }

        let outcome = guard.attempt_login(EMAIL, "wrong", now).await.unwrap();
        let until = now + TimeDelta::seconds(1800);
        assert_eq!(
            outcome,
            LoginOutcome::Rejected(LoginRejection::AccountLocked { until })
        );

        let after = reload(&store, account.id).await;
        assert_eq!(after.failed_attempt_count, 6);
        assert_eq!(after.locked_until, Some(until));
    }

    #[tokio::test]
    async fn test_reached_boundary_locks_at_five() {
        let policy = LockoutPolicy::builder()
            .boundary(LockoutBoundary::Reached)
            .build();
        let (store, guard, account) = setup(policy).await;
        set_state(&store, account.id, 5, None).await;
        let now = Utc::now();

        let outcome = guard.attempt_login(EMAIL, "wrong", now).await.unwrap();
        let until = now + TimeDelta::seconds(1800);

        assert_eq!(
            outcome,
            LoginOutcome::Rejected(LoginRejection::AccountLocked { until })
        );
        assert_eq!(reload(&store, account.id).await.locked_until, Some(until));
    }

    #[tokio::test]
    async fn test_locked_account_rejects_correct_password_without_mutation() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let now = Utc::now();
        let until = now + TimeDelta::minutes(10);
        let locked = set_state(&store, account.id, 6, Some(until)).await;

        for password in [PASSWORD, "wrong"] {
            let outcome = guard.attempt_login(EMAIL, password, now).await.unwrap();
            assert_eq!(
                outcome,
                LoginOutcome::Rejected(LoginRejection::AccountLocked { until })
            );
            assert_eq!(reload(&store, account.id).await, locked);
        }
    }

    #[tokio::test]
    async fn test_lock_deadline_is_inclusive() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let until = Utc::now();
        set_state(&store, account.id, 6, Some(until)).await;

        let outcome = guard.attempt_login(EMAIL, PASSWORD, until).await.unwrap();
        assert!(matches!(
            outcome,
            LoginOutcome::Rejected(LoginRejection::AccountLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_resets_then_evaluates() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let now = Utc::now();
        set_state(&store, account.id, 6, Some(now - TimeDelta::seconds(1))).await;

        let outcome = guard.attempt_login(EMAIL, "wrong", now).await.unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Rejected(LoginRejection::BadCredentials {
                attempts_remaining: 5
            })
        );

        let after = reload(&store, account.id).await;
        assert_eq!(after.failed_attempt_count, 1);
        assert!(after.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_then_correct_password() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let now = Utc::now();
        set_state(&store, account.id, 6, Some(now - TimeDelta::minutes(1))).await;

        let outcome = guard.attempt_login(EMAIL, PASSWORD, now).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Accepted(_)));

        let after = reload(&store, account.id).await;
        assert_eq!(after.failed_attempt_count, 0);
        assert!(after.locked_until.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_serialized() {
        let (store, guard, account) = setup(LockoutPolicy::default()).await;
        let guard = Arc::new(guard);
        let now = Utc::now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let guard = Arc::clone(&guard);
                tokio::spawn(async move { guard.attempt_login(EMAIL, "wrong", now).await })
            })
            .collect();

        let mut bad_credentials = 0;
        for handle in handles {
            if let LoginOutcome::Rejected(LoginRejection::BadCredentials { .. }) =
                handle.await.unwrap().unwrap()
            {
                bad_credentials += 1;
            }
        }

        let after = reload(&store, account.id).await;
        assert_eq!(bad_credentials, 6);
        assert_eq!(after.failed_attempt_count, 6);
        assert!(after.locked_until.is_some());
    }

    #[tokio::test]
    async fn test_account_locks_prune_idle_entries() {
        let locks = AccountLocks::new();
        {
            let _a = locks.lock(1).await;
            let _b = locks.lock(2).await;
            assert_eq!(locks.len(), 2);
        }
        let _c = locks.lock(3).await;
        assert_eq!(locks.len(), 1);
    }
}
