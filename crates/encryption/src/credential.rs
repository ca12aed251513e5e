//! Salted, Iterated Credential Hash
//!
//! ```text
//! h_0 = SHA-256(password || salt)
//! h_i = SHA-256(h_{i-1})            for i in 1..=rounds
//! stored = hex(h_rounds)
//! ```
//!
//! Salts come from the OS CSPRNG and are stored hex-encoded next to the hash.
//! Verification compares digests in constant time.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Default stretching rounds
pub const DEFAULT_ROUNDS: u32 = 10_000;

/// Lowest accepted round count
pub const MIN_ROUNDS: u32 = 1_000;

/// Default and minimum salt length in bytes
pub const DEFAULT_SALT_LEN: usize = 16;
pub const MIN_SALT_LEN: usize = 16;

/// Credential hashing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialHasher {
    rounds: u32,
    salt_len: usize,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            salt_len: DEFAULT_SALT_LEN,
        }
    }
}

impl CredentialHasher {
    pub fn new(rounds: u32, salt_len: usize) -> Result<Self> {
        if rounds < MIN_ROUNDS {
            return Err(CryptoError::InvalidConfiguration(format!(
                "credential rounds {rounds} below minimum {MIN_ROUNDS}"
            )));
        }
        if salt_len < MIN_SALT_LEN {
            return Err(CryptoError::InvalidConfiguration(format!(
                "salt length {salt_len} below minimum {MIN_SALT_LEN}"
            )));
        }
        Ok(Self { rounds, salt_len })
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    /// Fresh random salt, hex-encoded
    pub fn generate_salt(&self) -> String {
        let mut salt = vec![0u8; self.salt_len];
        OsRng.fill_bytes(&mut salt);
        hex::encode(salt)
    }

    pub fn hash(&self, password: &str, salt: &str) -> String {
        hex::encode(stretch(password.as_bytes(), salt.as_bytes(), self.rounds))
    }

    /// Recompute and compare in constant time. A malformed `expected_hash`
    /// never verifies.
    pub fn verify(&self, password: &str, salt: &str, expected_hash: &str) -> bool {
        let Ok(expected) = hex::decode(expected_hash.trim()) else {
            return false;
        };
        let actual = stretch(password.as_bytes(), salt.as_bytes(), self.rounds);
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

fn stretch(password: &[u8], salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut seed = Zeroizing::new(Vec::with_capacity(password.len() + salt.len()));
    seed.extend_from_slice(password);
    seed.extend_from_slice(salt);

    let mut digest: [u8; 32] = Sha256::digest(seed.as_slice()).into();
    for _ in 0..rounds {
        digest = Sha256::digest(digest).into();
    }
    digest
}

/// `hash` with default parameters
pub fn hash_password(password: &str, salt: &str) -> String {
    CredentialHasher::default().hash(password, salt)
}

/// `verify` with default parameters
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    CredentialHasher::default().verify(password, salt, expected_hash)
}
