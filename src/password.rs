//! Password hashing.
//!
//! New passwords are stored as Argon2id PHC strings. Accounts imported from
//! Django fixtures keep their `pbkdf2_sha256$...` hashes and still verify.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const DJANGO_PBKDF2_PREFIX: &str = "pbkdf2_sha256$";

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Returns `Ok(false)` on mismatch and an error only when the stored hash
/// cannot be parsed.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    if stored.starts_with(DJANGO_PBKDF2_PREFIX) {
        return verify_django_pbkdf2(password, stored);
    }

    let parsed_hash = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

/// `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>`
fn verify_django_pbkdf2(password: &str, stored: &str) -> Result<bool> {
    let mut parts = stored.splitn(4, '$');
    let (_, iterations, salt, digest) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(algo), Some(iterations), Some(salt), Some(digest)) => (algo, iterations, salt, digest),
        _ => anyhow::bail!("Invalid pbkdf2_sha256 hash format"),
    };

    let iterations: u32 = iterations
        .parse()
        .context("Invalid pbkdf2_sha256 iteration count")?;
    if iterations == 0 {
        anyhow::bail!("Invalid pbkdf2_sha256 iteration count");
    }

    let expected = STANDARD
        .decode(digest)
        .context("Invalid pbkdf2_sha256 digest encoding")?;
    if expected.is_empty() {
        anyhow::bail!("Invalid pbkdf2_sha256 digest");
    }

    let mut derived = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut derived);

    Ok(bool::from(derived.as_slice().ct_eq(expected.as_slice())))
}
