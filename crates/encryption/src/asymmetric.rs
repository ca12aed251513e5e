//! RSA-2048 Encryption, Signing, and Digests
//!
//! - Encryption: RSA-OAEP with SHA-256 (MGF1-SHA-256)
//! - Signatures: RSASSA-PKCS1-v1_5 over SHA-256
//! - Digests: SHA-256, lowercase hex
//!
//! Keys travel as PEM: PKCS#8 for private keys, SPKI for public keys.
//!
//! ## Block Capacity
//!
//! OAEP bounds a single block to `k - 2*hLen - 2` plaintext bytes, where `k`
//! is the modulus length in bytes and `hLen` the digest size. The bound is
//! derived from the digest type below; anything larger is rejected with
//! `PayloadTooLarge`. Use `envelope` for longer payloads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::digest::{typenum::Unsigned, OutputSizeUser};
use sha2::{Digest, Sha256};
use tracing::debug;

use common::{PrivateKeyPem, KEY_SIZE_BITS};

use crate::error::{CryptoError, Result};

/// Modulus size in bits
pub const MODULUS_BITS: usize = KEY_SIZE_BITS as usize;

/// Modulus size in bytes
pub const MODULUS_BYTES: usize = MODULUS_BITS / 8;

/// Output size of the OAEP digest
pub const OAEP_HASH_LEN: usize = <Sha256 as OutputSizeUser>::OutputSize::USIZE;

/// Largest plaintext a single OAEP block can carry
pub const MAX_CHUNK_BYTES: usize = MODULUS_BYTES - 2 * OAEP_HASH_LEN - 2;

/// Hex characters kept from a public key digest when fingerprinting
const FINGERPRINT_HEX_LEN: usize = 16;

/// Freshly generated, PEM-encoded key pair
#[derive(Clone)]
pub struct GeneratedKeyPair {
    pub public_key: String,
    pub private_key: PrivateKeyPem,
}

impl GeneratedKeyPair {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key)
    }
}

impl std::fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a 2048-bit key pair from the OS CSPRNG
pub fn generate_key_pair() -> Result<GeneratedKeyPair> {
    let private = RsaPrivateKey::new(&mut OsRng, MODULUS_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

    let pair = GeneratedKeyPair {
        public_key: public_pem,
        private_key: PrivateKeyPem::new(private_pem.as_str()),
    };
    debug!(fingerprint = %pair.fingerprint(), "generated RSA-{} key pair", MODULUS_BITS);
    Ok(pair)
}

fn require_modulus(size: usize) -> Result<()> {
    if size != MODULUS_BYTES {
        return Err(CryptoError::InvalidKey(format!(
            "expected {MODULUS_BITS}-bit modulus, got {} bits",
            size * 8
        )));
    }
    Ok(())
}

/// Parse an SPKI PEM public key; only 2048-bit moduli are accepted
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    let key = RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("public key: {e}")))?;
    require_modulus(key.size())?;
    Ok(key)
}

/// Parse a PKCS#8 PEM private key; only 2048-bit moduli are accepted
pub fn parse_private_key(pem: &PrivateKeyPem) -> Result<RsaPrivateKey> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem.expose().trim())
        .map_err(|e| CryptoError::InvalidKey(format!("private key: {e}")))?;
    require_modulus(key.size())?;
    Ok(key)
}

/// Encrypt one OAEP block, returning raw ciphertext (always `MODULUS_BYTES` long)
pub fn encrypt_block(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_CHUNK_BYTES {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_CHUNK_BYTES,
        });
    }

    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Decrypt one OAEP block
pub fn decrypt_block(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    if ciphertext.len() != MODULUS_BYTES {
        return Err(CryptoError::DecryptionFailed);
    }

    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a single block under a PEM public key, base64-encoded
pub fn encrypt(plaintext: &[u8], public_key_pem: &str) -> Result<String> {
    let public_key = parse_public_key(public_key_pem)?;
    encrypt_block(plaintext, &public_key).map(|ct| STANDARD.encode(ct))
}

/// Decrypt a base64 single-block ciphertext under a PEM private key
///
/// Every failure past key parsing is `DecryptionFailed`; no partial output.
pub fn decrypt(ciphertext: &str, private_key_pem: &PrivateKeyPem) -> Result<Vec<u8>> {
    let private_key = parse_private_key(private_key_pem)?;
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::DecryptionFailed)?;
    decrypt_block(&raw, &private_key)
}

pub fn sign_with(data: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| CryptoError::EncryptionFailed(format!("signing: {e}")))?;
    Ok(signature.to_vec())
}

pub fn verify_with(data: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    verifying_key.verify(data, &signature).is_ok()
}

/// Hash-then-sign `data`, base64-encoded
pub fn sign(data: &[u8], private_key_pem: &PrivateKeyPem) -> Result<String> {
    let private_key = parse_private_key(private_key_pem)?;
    sign_with(data, &private_key).map(|sig| STANDARD.encode(sig))
}

/// Check a base64 signature against a PEM public key
///
/// Never errors: unparseable keys, undecodable or structurally invalid
/// signatures, and mismatches all return `false`.
pub fn verify(data: &[u8], signature: &str, public_key_pem: &str) -> bool {
    let Ok(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    verify_with(data, &raw, &public_key)
}

/// SHA-256 digest rendered as lowercase hex
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Short, stable identifier for a public key, safe to log
pub fn fingerprint(public_key_pem: &str) -> String {
    let mut digest = hash(public_key_pem.trim().as_bytes());
    digest.truncate(FINGERPRINT_HEX_LEN);
    digest
}
