//! AES-256-CBC Envelope Encryption
//!
//! Each call draws a fresh 16-byte IV from the OS RNG and prepends it to the
//! PKCS#7-padded ciphertext:
//!
//! ```text
//! envelope = base64( IV[16] || AES-256-CBC(key, IV, pad(plaintext)) )
//! ```
//!
//! ## Security Properties
//!
//! - Confidentiality: AES-256 strength
//! - Randomized: same plaintext + key never yields the same envelope
//! - No authentication: a wrong key or corrupted block surfaces as a padding
//!   failure or garbage; both are reported as `DecryptionFailed`
//!   (use `tamper` for integrity)

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// CBC IV size, one AES block (128 bits)
pub const IV_SIZE: usize = 16;

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from an arbitrary slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {KEY_SIZE}-byte key, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"[REDACTED]").finish()
    }
}

/// Encrypt into raw envelope bytes (`IV || ciphertext`)
///
/// # Errors
///
/// `InvalidKey` if `key` is not exactly 32 bytes. Checked before any
/// cipher state is created.
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let key = SymmetricKey::from_slice(key)?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new(key.as_bytes().into(), (&iv).into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);

    debug!(
        plaintext_len = plaintext.len(),
        envelope_len = envelope.len(),
        "symmetric envelope sealed"
    );
    Ok(envelope)
}

/// Decrypt raw envelope bytes
///
/// # Errors
///
/// - `InvalidKey` if `key` is not 32 bytes
/// - `MalformedEnvelope` if shorter than one IV
/// - `DecryptionFailed` for any padding or length mismatch
pub fn decrypt_bytes(envelope: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let key = SymmetricKey::from_slice(key)?;

    if envelope.len() < IV_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "envelope is {} bytes, shorter than the {IV_SIZE}-byte IV",
            envelope.len()
        )));
    }

    let (iv, ciphertext) = envelope.split_at(IV_SIZE);
    let iv: &[u8; IV_SIZE] = iv
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope("IV split failed".into()))?;

    let cipher = Aes256CbcDec::new(key.as_bytes().into(), iv.into());
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt and render the envelope as standard base64
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String> {
    encrypt_bytes(plaintext, key).map(|envelope| STANDARD.encode(envelope))
}

/// Decode a base64 envelope and decrypt it
pub fn decrypt(envelope: &str, key: &[u8]) -> Result<Vec<u8>> {
    // Key validation precedes decoding so a bad key never reaches the cipher
    SymmetricKey::from_slice(key)?;

    let raw = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid base64: {e}")))?;
    decrypt_bytes(&raw, key)
}

/// Convenience wrapper for UTF-8 text
pub fn encrypt_text(plaintext: &str, key: &[u8]) -> Result<String> {
    encrypt(plaintext.as_bytes(), key)
}

/// Convenience wrapper for UTF-8 text; non-UTF-8 output counts as a failed decryption
pub fn decrypt_text(envelope: &str, key: &[u8]) -> Result<String> {
    let bytes = decrypt(envelope, key)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed)
}
