//! Signing secret validation
//!
//! The process-wide secret signs both session tokens and password-reset
//! tokens. It is loaded once at startup, checked against a
//! [`SecretPolicy`] for the deployment environment, and then passed around
//! as a [`SigningSecret`] value rather than read from global state.
//!
//! # Example
//!
//! ```
//! use quillpost::secret::{SecretPolicy, SigningSecret};
//!
//! let policy = SecretPolicy::for_environment("development");
//! let secret = SigningSecret::new("e789d02eeb0875c93c93995dc6aeef9f", &policy);
//! assert!(secret.is_ok());
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Reasons a candidate secret is refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SecretError {
    #[error("secret length ({actual} chars) is below minimum ({minimum} chars) for {context}")]
    TooShort {
        actual: usize,
        minimum: usize,
        context: String,
    },

    #[error("secret contains weak pattern: '{pattern}'")]
    WeakPattern { pattern: String },

    #[error("secret entropy ({actual:.1} bits) is below minimum ({minimum:.1} bits) for {context}")]
    LowEntropy {
        actual: f64,
        minimum: f64,
        context: String,
    },

    #[error("secret must contain: {}", missing.join(", "))]
    InsufficientDiversity { missing: Vec<String> },
}

/// Requirements a signing secret must meet.
#[derive(Debug, Clone)]
pub struct SecretPolicy {
    /// Minimum secret length in characters
    pub min_length: usize,
    /// Minimum Shannon entropy in bits
    pub min_entropy: f64,
    /// Require upper, lower, digit and special characters
    pub require_diversity: bool,
    /// Reject secrets containing well-known words
    pub check_weak_patterns: bool,
    /// Context string for error messages
    pub context: String,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::for_environment("development")
    }
}

impl SecretPolicy {
    /// Create a policy for a deployment environment.
    ///
    /// - `production`: 64 char min, 128-bit entropy, diversity required
    /// - `testing`: 32 char min, 64-bit entropy
    /// - `development` (default): 32 char min, 32-bit entropy
    pub fn for_environment(environment: &str) -> Self {
        match environment.to_lowercase().as_str() {
            "production" | "prod" => Self {
                min_length: 64,
                min_entropy: 128.0,
                require_diversity: true,
                check_weak_patterns: true,
                context: "production environment".to_string(),
            },
            "testing" | "test" => Self {
                min_length: 32,
                min_entropy: 64.0,
                require_diversity: false,
                check_weak_patterns: true,
                context: "testing environment".to_string(),
            },
            _ => Self {
                min_length: 32,
                min_entropy: 32.0,
                require_diversity: false,
                check_weak_patterns: true,
                context: "development environment".to_string(),
            },
        }
    }

    /// Validate a candidate secret against this policy.
    pub fn validate(&self, secret: &str) -> Result<(), SecretError> {
        let length = secret.chars().count();
        if length < self.min_length {
            return Err(SecretError::TooShort {
                actual: length,
                minimum: self.min_length,
                context: self.context.clone(),
            });
        }

        if self.check_weak_patterns {
            if let Some(pattern) = find_weak_pattern(secret) {
                return Err(SecretError::WeakPattern {
                    pattern: pattern.to_string(),
                });
            }
        }

        let entropy = shannon_entropy(secret);
        if entropy < self.min_entropy {
            return Err(SecretError::LowEntropy {
                actual: entropy,
                minimum: self.min_entropy,
                context: self.context.clone(),
            });
        }

        if self.require_diversity {
            let missing = missing_character_classes(secret);
            if !missing.is_empty() {
                return Err(SecretError::InsufficientDiversity { missing });
            }
        }

        Ok(())
    }
}

fn find_weak_pattern(secret: &str) -> Option<&'static str> {
    const WEAK_PATTERNS: &[&str] = &[
        "secret", "password", "admin", "123456", "qwerty", "default",
        "example", "changeme", "letmein", "welcome",
    ];

    let lower = secret.to_lowercase();
    WEAK_PATTERNS.iter().copied().find(|p| lower.contains(p))
}

fn missing_character_classes(secret: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !secret.chars().any(|c| c.is_uppercase()) {
        missing.push("uppercase letters".to_string());
    }
    if !secret.chars().any(|c| c.is_lowercase()) {
        missing.push("lowercase letters".to_string());
    }
    if !secret.chars().any(|c| c.is_ascii_digit()) {
        missing.push("digits".to_string());
    }
    if !secret.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        missing.push("special characters".to_string());
    }

    missing
}

/// Total Shannon entropy of a string in bits (per-char entropy times length).
pub fn shannon_entropy(s: &str) -> f64 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let total = total as f64;
    let per_char: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum();

    per_char * total
}

/// A validated signing secret.
///
/// The secret bytes never appear in `Debug` output.
#[derive(Clone)]
pub struct SigningSecret(String);

impl SigningSecret {
    /// Validate `secret` against `policy` and wrap it.
    pub fn new(secret: impl Into<String>, policy: &SecretPolicy) -> Result<Self, SecretError> {
        let secret = secret.into();
        policy.validate(&secret)?;
        Ok(Self(secret))
    }

    /// Raw key material for HMAC signing.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}
