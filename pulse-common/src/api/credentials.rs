//! Password hashing and session tokens
//!
//! Passwords are stored as iterated, salted SHA-256 digests alongside their
//! random salt. Session tokens are random 256-bit values handed to the client
//! once; only their SHA-256 digest is persisted.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of SHA-256 rounds applied to a password
const PASSWORD_ROUNDS: u32 = 10_000;

/// Generate a random 16-byte salt (32 hex characters)
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with the given salt
///
/// # Examples
///
/// ```
/// use pulse_common::api::credentials::hash_password;
///
/// let hash = hash_password("correct horse", "00ff");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_password("correct horse", "00ff"));
/// ```
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();

    for _ in 1..PASSWORD_ROUNDS {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }

    hex::encode(digest)
}

/// Check a password against a stored hash in constant time
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    if expected_hash.is_empty() {
        return false;
    }
    let calculated = hash_password(password, salt);
    constant_time_eq(calculated.as_bytes(), expected_hash.as_bytes())
}

/// Generate a random session token (64 hex characters)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest under which a session token is stored
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Byte comparison whose duration does not depend on where inputs differ
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
