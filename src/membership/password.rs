//! Password hashing, salt generation, and strength validation.

use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha224};

use crate::error::MembershipError;

const SALT_LENGTH: usize = 16;
const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_PASSWORD_LENGTH: usize = 50;
const MIN_DISTINCT_CHARS: usize = 3;
const FORBIDDEN_PASSWORDS: [&str; 4] = ["password", "qwerty", "123456", "1234567"];

/// Digest of `password || salt` as lowercase hex.
///
/// Deterministic for a given pair; the same salt is reused for
/// verification, never for comparing raw passwords.
#[must_use]
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// A new alphanumeric salt drawn from the OS entropy source.
#[must_use]
pub fn new_salt() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

/// Minimum bars for a password, not a full strength score.
#[must_use]
pub fn validate_password(password: &str) -> bool {
    if password.trim().is_empty() {
        return false;
    }
    let length = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
        return false;
    }
    let distinct: HashSet<char> = password.chars().collect();
    if distinct.len() < MIN_DISTINCT_CHARS {
        return false;
    }
    !FORBIDDEN_PASSWORDS.contains(&password.to_lowercase().as_str())
}

/// Validates a new password and its confirmation.
///
/// # Errors
/// `MissingPassword` when either value is empty, `PasswordMismatch` when
/// they differ, `WeakPassword` when the value fails [`validate_password`].
pub fn validate_passwords(
    password_one: &str,
    password_two: &str,
) -> Result<(), MembershipError> {
    if password_one.is_empty() || password_two.is_empty() {
        return Err(MembershipError::MissingPassword);
    }
    if password_one != password_two {
        return Err(MembershipError::PasswordMismatch);
    }
    if !validate_password(password_two) {
        return Err(MembershipError::WeakPassword);
    }
    Ok(())
}
