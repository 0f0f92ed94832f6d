//! Salted SHA-256 digests for course passwords, stored as `salt$digest` in hex.

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

pub fn hash(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", to_hex(&salt), to_hex(&digest(&salt, password)))
}

pub fn verify(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let Some(salt) = from_hex(salt_hex) else {
        return false;
    };
    let candidate = to_hex(&digest(&salt, password));
    constant_time_eq(candidate.as_bytes(), digest_hex.as_bytes())
}

/// Equality that reads every byte regardless of where the first mismatch is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verifies() {
        let stored = hash("hunter2");
        assert!(verify("hunter2", &stored));
        assert!(!verify("hunter3", &stored));
    }

    #[test]
    fn test_hash_is_salted() {
        assert_ne!(hash("same"), hash("same"));
    }

    #[test]
    fn test_verify_rejects_malformed() {
        assert!(!verify("x", "no-separator"));
        assert!(!verify("x", "zz$abcd"));
        assert!(!verify("x", "abc$abcd"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"admin", b"admin"));
        assert!(!constant_time_eq(b"admin", b"admiN"));
        assert!(!constant_time_eq(b"admin", b"admin1"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = [0x00, 0x7f, 0xff, 0x10];
        assert_eq!(from_hex(&to_hex(&bytes)), Some(bytes.to_vec()));
    }
}
