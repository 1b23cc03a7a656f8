//! Cryptographic utilities shared across Tenantry crates
//!
//! - API keys: salted SHA-256, stored as `hex(salt):hex(sha256(key || salt))`
//! - Passwords: bcrypt
//! - Shared invite tokens: MD5 hex digest of 16 random bytes. These are
//!   looked up, never verified, so only unguessability matters.
//! - Webhook signatures: HMAC-SHA256, hex encoded

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// bcrypt work factor for password hashes
const PASSWORD_COST: u32 = 10;

/// Fill `N` bytes from the thread-local CSPRNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// 32 hex chars derived from 128 random bits
pub fn shared_invite_token() -> String {
    let seed = random_bytes::<16>();
    hex::encode(Md5::digest(seed))
}

/// Hash a secret with a fresh 16-byte salt
pub fn hash_key(key: &str) -> String {
    let salt = random_bytes::<16>();
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(salt);
    format!("{}:{}", hex::encode(salt), hex::encode(hasher.finalize()))
}

/// Verify an API key against a stored hash using constant-time comparison.
pub fn verify_key_hash(candidate_key: &str, stored_hash: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored_hash.split_once(':') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(candidate_key.as_bytes());
    hasher.update(&salt);

    constant_time_eq(&hash, &hasher.finalize())
}

/// Byte comparison whose running time does not depend on where inputs differ
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Timestamp and `v1` signatures from a `t=<ts>,v1=<hex>[,v1=<hex>]` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    /// Accepts `,` or `, ` separators; unknown keys are ignored
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.trim().parse().ok(),
                Some(("v1", v)) => signatures.push(v.trim().to_string()),
                _ => {}
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }

    /// True when any `v1` signature equals `expected_hex`
    pub fn matches(&self, expected_hex: &str) -> bool {
        self.signatures
            .iter()
            .any(|sig| constant_time_eq(sig.as_bytes(), expected_hex.as_bytes()))
    }
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, PASSWORD_COST)
}

/// A malformed stored hash counts as a mismatch
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    bcrypt::verify(password, stored_hash).unwrap_or(false)
}
