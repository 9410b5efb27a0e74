//! Password hashing behind a trait seam.
//!
//! The identity store never sees raw passwords and never compares hashes
//! itself; it stores whatever opaque string `CredentialStore::store`
//! produces and hands it back to `verify`. The default implementation uses
//! iterated SHA-256 (100k rounds) with a per-credential random salt,
//! encoded as `salt$hash` in hex.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Key-stretching rounds for password hashing.
const HASH_ITERATIONS: usize = 100_000;

/// Salt length in bytes (hex-encoded to 32 chars).
const SALT_BYTES: usize = 16;

/// Pluggable password hashing and verification.
pub trait CredentialStore: Send + Sync {
    /// Hash a raw password into an opaque storable string.
    fn store(&self, raw: &str) -> Result<String>;

    /// Whether `candidate` matches the previously stored `hashed` value.
    /// Must compare in constant time.
    fn verify(&self, hashed: &str, candidate: &str) -> bool;

    /// Burn roughly the same work as a real verification. Called on the
    /// unknown-email path so lookup misses are not distinguishable from
    /// wrong passwords by response timing.
    fn equalize(&self, _candidate: &str) {}
}

/// Iterated-SHA-256 credential store. Stores `hex(salt)$hex(hash)`.
#[derive(Debug, Default, Clone)]
pub struct HashedCredentialStore;

impl HashedCredentialStore {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialStore for HashedCredentialStore {
    fn store(&self, raw: &str) -> Result<String> {
        let salt = generate_salt();
        let hash = hash_password(raw, &salt);
        Ok(format!("{salt}${hash}"))
    }

    fn verify(&self, hashed: &str, candidate: &str) -> bool {
        let Some((salt, stored)) = hashed.split_once('$') else {
            // Unparseable slot: still burn the work before rejecting.
            self.equalize(candidate);
            return false;
        };
        let attempt = hash_password(candidate, salt);
        constant_time_eq(stored.as_bytes(), attempt.as_bytes())
    }

    fn equalize(&self, candidate: &str) {
        let _ = hash_password(candidate, "00000000000000000000000000000000");
    }
}

/// Random per-credential salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_per_salt() {
        let h1 = hash_password("test_password", "fixed_salt_value");
        let h2 = hash_password("test_password", "fixed_salt_value");
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_salts_differ() {
        let h1 = hash_password("test_password", "salt_a");
        let h2 = hash_password("test_password", "salt_b");
        assert_ne!(h1, h2);
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn store_then_verify_round_trip() {
        let creds = HashedCredentialStore::new();
        let stored = creds.store("correct horse battery").unwrap();
        assert!(creds.verify(&stored, "correct horse battery"));
        assert!(!creds.verify(&stored, "correct horse batterz"));
        assert!(!creds.verify(&stored, ""));
    }

    #[test]
    fn stored_format_is_salt_dollar_hash() {
        let creds = HashedCredentialStore::new();
        let stored = creds.store("pw").unwrap();
        let (salt, hash) = stored.split_once('$').unwrap();
        assert_eq!(salt.len(), SALT_BYTES * 2);
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn same_password_hashes_differently_across_stores() {
        let creds = HashedCredentialStore::new();
        let a = creds.store("pw").unwrap();
        let b = creds.store("pw").unwrap();
        assert_ne!(a, b);
        assert!(creds.verify(&a, "pw"));
        assert!(creds.verify(&b, "pw"));
    }

    #[test]
    fn malformed_slot_rejects() {
        let creds = HashedCredentialStore::new();
        assert!(!creds.verify("no-dollar-separator", "pw"));
        assert!(!creds.verify("", "pw"));
    }
}
