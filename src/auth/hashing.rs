//! Salted, iterated password hashing (PBKDF2-HMAC-SHA256).
//!
//! Hash and salt are stored base64-encoded. The iteration count is
//! persisted per user record, so `DEFAULT_ITERATIONS` can be raised
//! later without invalidating existing hashes — old records keep
//! verifying at their original cost until a password change rehashes
//! them at the current default.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use thiserror::Error;

/// PBKDF2 iteration count for newly derived hashes.
///
/// Deliberately expensive against offline brute force, still well
/// under a second on commodity hardware.
pub const DEFAULT_ITERATIONS: u32 = 240_000;

/// Salt length in bytes, generated once per user at creation.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes (SHA-256 output size).
const KEY_LEN: usize = 32;

/// Output of a fresh derivation: everything the store persists.
#[derive(Debug, Clone)]
pub struct DerivedPassword {
    /// Base64-encoded PBKDF2 output.
    pub hash: String,
    /// Base64-encoded random salt.
    pub salt: String,
    /// Cost factor the hash was derived at.
    pub iterations: u32,
}

/// A stored hash or salt field failed to decode.
#[derive(Debug, Error)]
#[error("stored credential field is not valid base64: {0}")]
pub struct CorruptEncoding(#[from] base64::DecodeError);

/// Derive a hash for a new password: fresh random salt at the given cost.
pub fn derive(password: &str, iterations: u32) -> DerivedPassword {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    DerivedPassword {
        hash: derive_with(password, &salt, iterations),
        salt: BASE64.encode(salt),
        iterations,
    }
}

/// Derive a base64-encoded hash from an explicit salt and cost.
pub fn derive_with(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, iterations, &mut key);
    BASE64.encode(key)
}

/// Verify a password attempt against stored (base64) salt + hash at the
/// *stored* cost — never the current default.
pub fn verify(
    password: &str,
    stored_salt: &str,
    stored_iterations: u32,
    stored_hash: &str,
) -> Result<bool, CorruptEncoding> {
    let salt = BASE64.decode(stored_salt)?;
    let expected = BASE64.decode(stored_hash)?;
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), &salt, stored_iterations, &mut key);
    Ok(constant_time_eq(&key, &expected))
}

/// Burn one derivation for a nonexistent user so lookup misses take as
/// long as password mismatches.
pub fn dummy_derive(password: &str, iterations: u32) {
    let _ = derive_with(password, &[0u8; SALT_LEN], iterations);
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

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_salt_same_cost_is_deterministic() {
        let salt = b"0123456789abcdef";
        let h1 = derive_with("hunter2hunter2", salt, 1_000);
        let h2 = derive_with("hunter2hunter2", salt, 1_000);
        assert_eq!(h1, h2);
    }

    #[test]
    fn fresh_salts_differ() {
        let d1 = derive("same password", 3_000);
        let d2 = derive("same password", 3_000);
        assert_ne!(d1.salt, d2.salt);
        assert_ne!(d1.hash, d2.hash);
        assert_eq!(d1.iterations, 3_000);
    }

    #[test]
    fn verify_round_trip() {
        let d = derive("Secret123!", 3_000);
        assert!(verify("Secret123!", &d.salt, d.iterations, &d.hash).unwrap());
        assert!(!verify("secret123!", &d.salt, d.iterations, &d.hash).unwrap());
    }

    #[test]
    fn verify_uses_stored_cost_not_default() {
        let salt = [7u8; SALT_LEN];
        let hash = derive_with("pw at low cost", &salt, 2_000);
        let salt_b64 = BASE64.encode(salt);
        // Would fail if verification recomputed at DEFAULT_ITERATIONS.
        assert!(verify("pw at low cost", &salt_b64, 2_000, &hash).unwrap());
    }

    #[test]
    fn corrupt_base64_is_an_error_not_a_mismatch() {
        let err = verify("pw", "not base64!!", 1_000, "also not base64!!");
        assert!(err.is_err());
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
