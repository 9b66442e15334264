//! Password hashing with Argon2id.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// Hashing failures. Verification never errors; it only answers yes or no.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("hashing task failed: {0}")]
    Task(String),
}

/// One-way salted credential hashing.
pub trait CredentialHasher: Send + Sync {
    /// Produce a self-describing hash string with a fresh salt.
    fn hash(&self, plaintext: &str) -> Result<String, HashError>;

    /// Check `plaintext` against a stored hash. Malformed hashes never match.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// Argon2id hasher producing PHC strings.
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| HashError::Hash(e.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        // Params come from the PHC string, not from self.
        PasswordHash::new(hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(plaintext.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) fn cheap_hasher() -> Argon2Hasher {
    Argon2Hasher::with_params(8, 1, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = cheap_hasher();
        let hash = hasher.hash("hunter22").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("hunter22", &hash));
        assert!(!hasher.verify("hunter23", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let hasher = cheap_hasher();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!cheap_hasher().verify("anything", "not-a-phc-string"));
        assert!(!cheap_hasher().verify("", ""));
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            Argon2Hasher::with_params(0, 0, 0),
            Err(HashError::Params(_))
        ));
    }
}
