//! Security Event Logging
//!
//! Structured logging for authentication and account-security decisions.
//!
//! # Usage
//!
//! ```ignore
//! use quillpost::observability::SecurityEvent;
//!
//! quillpost::security_event!(
//!     SecurityEvent::AuthenticationFailure,
//!     email = %email,
//!     attempts_remaining = 3,
//!     "Login failed"
//! );
//! ```

use std::fmt;

/// Security event categories for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication
    /// Successful login
    AuthenticationSuccess,
    /// Failed login attempt
    AuthenticationFailure,
    /// User logout
    Logout,

    // Authorization
    /// Caller tried to modify a resource they do not own
    AccessDenied,

    // Account management
    /// New account registered
    UserRegistered,
    /// Username or email changed
    UserModified,
    /// Password replaced through the reset flow
    PasswordChanged,
    /// Reset email requested
    PasswordResetRequested,
    /// Reset token failed verification
    PasswordResetRejected,

    // Protection
    /// Per-IP request budget exhausted
    RateLimitExceeded,
    /// Account locked after repeated failures
    AccountLocked,
    /// Expired lock cleared at the next attempt
    AccountUnlocked,

    // System
    /// Application started
    SystemStartup,
    /// Database pool established
    DatabaseConnected,
}

impl SecurityEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess | Self::AuthenticationFailure | Self::Logout => {
                "authentication"
            }

            Self::AccessDenied => "authorization",

            Self::UserRegistered
            | Self::UserModified
            | Self::PasswordChanged
            | Self::PasswordResetRequested
            | Self::PasswordResetRejected => "user_management",

            Self::RateLimitExceeded | Self::AccountLocked | Self::AccountUnlocked => "security",

            Self::SystemStartup | Self::DatabaseConnected => "system",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            Self::AuthenticationFailure
            | Self::AccessDenied
            | Self::AccountLocked
            | Self::RateLimitExceeded
            | Self::PasswordResetRejected => Severity::High,

            Self::AuthenticationSuccess
            | Self::UserRegistered
            | Self::UserModified
            | Self::PasswordChanged
            | Self::PasswordResetRequested
            | Self::AccountUnlocked => Severity::Medium,

            Self::Logout | Self::SystemStartup | Self::DatabaseConnected => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::Logout => "logout",
            Self::AccessDenied => "access_denied",
            Self::UserRegistered => "user_registered",
            Self::UserModified => "user_modified",
            Self::PasswordChanged => "password_changed",
            Self::PasswordResetRequested => "password_reset_requested",
            Self::PasswordResetRejected => "password_reset_rejected",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::AccountLocked => "account_locked",
            Self::AccountUnlocked => "account_unlocked",
            Self::SystemStartup => "system_startup",
            Self::DatabaseConnected => "database_connected",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Log a security event with structured fields.
///
/// Adds `security_event`, `category` and `severity` to the given fields
/// and logs at `warn` (high), `info` (medium) or `debug` (low).
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let category = event.category();
        let event_name = event.name();

        match event.severity() {
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_categories() {
        assert_eq!(SecurityEvent::AuthenticationSuccess.category(), "authentication");
        assert_eq!(SecurityEvent::AccessDenied.category(), "authorization");
        assert_eq!(SecurityEvent::PasswordChanged.category(), "user_management");
        assert_eq!(SecurityEvent::AccountLocked.category(), "security");
        assert_eq!(SecurityEvent::SystemStartup.category(), "system");
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(SecurityEvent::AccountLocked.severity(), Severity::High);
        assert_eq!(SecurityEvent::PasswordResetRequested.severity(), Severity::Medium);
        assert_eq!(SecurityEvent::Logout.severity(), Severity::Low);
        assert!(Severity::Low < Severity::Medium && Severity::Medium < Severity::High);
    }

    #[test]
    fn test_macro_expands_for_every_severity() {
        crate::security_event!(SecurityEvent::AccountLocked, email = "a@b.co", "locked");
        crate::security_event!(SecurityEvent::UserRegistered, user_id = 1, "registered");
        crate::security_event!(SecurityEvent::Logout, "logout");
    }
}
