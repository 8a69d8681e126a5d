use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use log::warn;

use crate::error::{DashboardError, Result};

/// Decides whether a presented secret unlocks admin actions (upload, reset)
pub trait CredentialCheck: Send + Sync {
    /// Whether admin actions need a secret at all
    fn required(&self) -> bool;

    /// Check a presented secret
    fn verify(&self, secret: &str) -> bool;
}

/// No gate: every caller may upload and reset
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAccess;

impl CredentialCheck for OpenAccess {
    fn required(&self) -> bool {
        false
    }

    fn verify(&self, _secret: &str) -> bool {
        true
    }
}

/// Gate backed by a stored Argon2 hash
#[derive(Clone, Debug)]
pub struct Argon2Credential {
    hash: String,
}

impl Argon2Credential {
    /// Wrap a PHC-format Argon2 hash, rejecting malformed input up front
    pub fn from_hash(hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        PasswordHash::new(&hash)
            .map_err(|e| DashboardError::Config(format!("invalid admin password hash: {}", e)))?;
        Ok(Self { hash })
    }
}

impl CredentialCheck for Argon2Credential {
    fn required(&self) -> bool {
        true
    }

    fn verify(&self, secret: &str) -> bool {
        match verify_password(secret, &self.hash) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("admin credential check failed: {}", e);
                false
            }
        }
    }
}

/// Credential check for an optional configured hash
///
/// A blank hash means no gate, the same as an absent one.
pub fn credential_from_config(hash: Option<&str>) -> Result<Box<dyn CredentialCheck>> {
    match hash.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hash) => Ok(Box::new(Argon2Credential::from_hash(hash)?)),
        None => Ok(Box::new(OpenAccess)),
    }
}

/// Hash a password using Argon2
///
/// Creates a PHC string suitable for `admin_password_hash`.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String>` - The password hash or a `Config` error
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(DashboardError::Config("password cannot be empty".to_string()));
    }
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DashboardError::Config(format!("password hashing failed: {}", e)))
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `Result<bool>` - True if the password matches, false if not, or an error
///   when the hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| DashboardError::Config(format!("invalid password hash format: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
