//! Password hashing (argon2id) and email/password authentication.

use std::sync::OnceLock;

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

use crate::models::User;
use crate::repository::{StoreError, UserRepository};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email, OAuth-only account, or wrong password.
    #[error("Incorrect email or password")]
    BadCredential,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hash a password using Argon2id. Returns a PHC-format string.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a PHC-format hash string.
pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Check the length bounds for a new password (in characters).
pub fn validate_new_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(format!(
            "Password must be between {} and {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        ));
    }
    Ok(())
}

// Verified against when the email is unknown so both failure paths cost one
// argon2 verification.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("not-a-real-password").ok())
        .as_deref()
}

/// Authenticate an email/password pair against the user store.
///
/// Email matching is exact and case-sensitive. Every failure other than a
/// store outage collapses into [`AuthError::BadCredential`].
pub async fn authenticate(
    users: &dyn UserRepository,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let Some(user) = users.get_by_email(email).await? else {
        if let Some(hash) = dummy_hash() {
            let _ = verify_password(password, hash);
        }
        tracing::debug!("Login attempt for unknown email");
        return Err(AuthError::BadCredential);
    };

    let Some(hash) = user.password_hash.as_deref() else {
        tracing::debug!("Password login attempt for OAuth-only account {}", user.id);
        return Err(AuthError::BadCredential);
    };

    match verify_password(password, hash) {
        Ok(true) => Ok(user),
        Ok(false) => Err(AuthError::BadCredential),
        Err(e) => {
            tracing::warn!("Stored password hash for user {} is unusable: {}", user.id, e);
            Err(AuthError::BadCredential)
        }
    }
}
