//! Password hashing and verification.
//!
//! All credentials are stored as Argon2id PHC strings. Rows migrated from
//! the legacy deployment may still hold plaintext; those verify through a
//! constant-time comparison and come back with a replacement hash so the
//! login path can upgrade them in place.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use rand_core::OsRng;
use subtle::ConstantTimeEq;

/// Outcome of checking a candidate password against a stored credential.
pub struct PasswordCheck {
    pub verified: bool,
    /// Set when the stored credential was legacy plaintext and should be
    /// replaced with this hash.
    pub upgrade_hash: Option<String>,
}

#[derive(Debug)]
pub struct HashError(String);

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Password hashing failed: {}", self.0)
    }
}

impl std::error::Error for HashError {}

/// Hash a password with a fresh random salt.
pub fn hash(password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| HashError(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a candidate against a stored credential.
pub fn verify(stored: &str, candidate: &str) -> Result<PasswordCheck, HashError> {
    if stored.starts_with("$argon2") {
        let parsed = PasswordHash::new(stored).map_err(|e| HashError(e.to_string()))?;
        let verified = Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok();
        return Ok(PasswordCheck {
            verified,
            upgrade_hash: None,
        });
    }

    // Legacy plaintext row.
    let verified: bool = stored.as_bytes().ct_eq(candidate.as_bytes()).into();
    if !verified {
        return Ok(PasswordCheck {
            verified: false,
            upgrade_hash: None,
        });
    }

    Ok(PasswordCheck {
        verified: true,
        upgrade_hash: Some(hash(candidate)?),
    })
}
