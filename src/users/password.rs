use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to derive secret: {0}")]
    Hash(String),
    #[error("stored secret is not a valid hash: {0}")]
    Malformed(String),
}

/// Derives the stored form of a plaintext password: Argon2id with a fresh random salt,
/// encoded as a PHC string.
pub fn derive_secret(plain: &str) -> Result<String, SecretError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            SecretError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Checks a plaintext password against a secret produced by [`derive_secret`].
pub fn verify_secret(plain: &str, hash: &str) -> Result<bool, SecretError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        SecretError::Malformed(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
