//! Chunked Long-Text Envelopes
//!
//! Carries payloads of any length using only the asymmetric cipher. Short
//! payloads are a single unmarked OAEP block; longer ones are split into
//! `threshold`-byte segments, each sealed independently under the same key:
//!
//! ```text
//! single:  base64(block)
//! multi:   "[MULTI]" base64(block_1) "|" base64(block_2) "|" ... base64(block_n)
//! ```
//!
//! `|` lies outside the standard base64 alphabet, so splitting on it can
//! never cut through a block. Parsing rejects empty segments and any segment
//! containing non-alphabet characters before attempting decryption.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPublicKey;
use tracing::debug;

use common::PrivateKeyPem;

use crate::asymmetric::{self, MAX_CHUNK_BYTES};
use crate::error::{CryptoError, Result};

/// Prefix marking a multi-block envelope
pub const MULTI_MARKER: &str = "[MULTI]";

/// Separator between multi-block segments
pub const CHUNK_DELIMITER: char = '|';

/// Segment size used unless configured otherwise; kept below block capacity
pub const DEFAULT_CHUNK_THRESHOLD: usize = MAX_CHUNK_BYTES - 10;

/// Structural view of an envelope string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeLayout<'a> {
    Single(&'a str),
    Multi(Vec<&'a str>),
}

impl EnvelopeLayout<'_> {
    pub fn block_count(&self) -> usize {
        match self {
            EnvelopeLayout::Single(_) => 1,
            EnvelopeLayout::Multi(blocks) => blocks.len(),
        }
    }
}

pub fn is_multi_block(envelope: &str) -> bool {
    envelope.trim_start().starts_with(MULTI_MARKER)
}

fn is_base64_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

/// Split an envelope into its encoded blocks without decrypting anything
pub fn parse(envelope: &str) -> Result<EnvelopeLayout<'_>> {
    let envelope = envelope.trim();
    if envelope.is_empty() {
        return Err(CryptoError::MalformedEnvelope("empty envelope".into()));
    }

    let Some(body) = envelope.strip_prefix(MULTI_MARKER) else {
        if !is_base64_segment(envelope) {
            return Err(CryptoError::MalformedEnvelope(
                "single-block envelope is not base64".into(),
            ));
        }
        return Ok(EnvelopeLayout::Single(envelope));
    };

    let blocks: Vec<&str> = body.split(CHUNK_DELIMITER).collect();
    if let Some(index) = blocks.iter().position(|block| !is_base64_segment(block)) {
        return Err(CryptoError::MalformedEnvelope(format!(
            "segment {index} of {} is empty or not base64",
            blocks.len()
        )));
    }

    Ok(EnvelopeLayout::Multi(blocks))
}

/// Splits, seals, and reassembles payloads larger than one OAEP block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedCipher {
    threshold: usize,
}

impl Default for ChunkedCipher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

impl ChunkedCipher {
    /// `threshold` must be in `1..MAX_CHUNK_BYTES`
    pub fn new(threshold: usize) -> Result<Self> {
        if threshold == 0 || threshold >= MAX_CHUNK_BYTES {
            return Err(CryptoError::InvalidConfiguration(format!(
                "chunk threshold {threshold} must be between 1 and {}",
                MAX_CHUNK_BYTES - 1
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of blocks `len` plaintext bytes will occupy
    pub fn blocks_for(&self, len: usize) -> usize {
        if len <= self.threshold {
            1
        } else {
            len.div_ceil(self.threshold)
        }
    }

    pub fn encrypt_with(&self, plaintext: &[u8], public_key: &RsaPublicKey) -> Result<String> {
        if plaintext.len() <= self.threshold {
            let block = asymmetric::encrypt_block(plaintext, public_key)?;
            return Ok(STANDARD.encode(block));
        }

        let mut envelope = String::from(MULTI_MARKER);
        for (index, chunk) in plaintext.chunks(self.threshold).enumerate() {
            if index > 0 {
                envelope.push(CHUNK_DELIMITER);
            }
            let block = asymmetric::encrypt_block(chunk, public_key)?;
            envelope.push_str(&STANDARD.encode(block));
        }

        debug!(
            plaintext_len = plaintext.len(),
            blocks = self.blocks_for(plaintext.len()),
            "sealed multi-block envelope"
        );
        Ok(envelope)
    }

    pub fn encrypt(&self, plaintext: &[u8], public_key_pem: &str) -> Result<String> {
        let public_key = asymmetric::parse_public_key(public_key_pem)?;
        self.encrypt_with(plaintext, &public_key)
    }

    /// Decrypt a single- or multi-block envelope
    ///
    /// Any block failing aborts the whole reconstruction; partial plaintext
    /// is never returned.
    pub fn decrypt(&self, envelope: &str, private_key_pem: &PrivateKeyPem) -> Result<Vec<u8>> {
        let layout = parse(envelope)?;
        let private_key = asymmetric::parse_private_key(private_key_pem)?;

        let blocks = match layout {
            EnvelopeLayout::Single(block) => vec![block],
            EnvelopeLayout::Multi(blocks) => blocks,
        };

        let mut plaintext = Vec::with_capacity(blocks.len() * self.threshold);
        for block in &blocks {
            let raw = STANDARD
                .decode(block)
                .map_err(|_| CryptoError::DecryptionFailed)?;
            let part = asymmetric::decrypt_block(&raw, &private_key)?;
            plaintext.extend_from_slice(&part);
        }

        debug!(blocks = blocks.len(), "opened envelope");
        Ok(plaintext)
    }

    pub fn encrypt_text(&self, plaintext: &str, public_key_pem: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes(), public_key_pem)
    }

    /// Reassembled bytes that are not UTF-8 count as a failed decryption
    pub fn decrypt_text(&self, envelope: &str, private_key_pem: &PrivateKeyPem) -> Result<String> {
        let bytes = self.decrypt(envelope, private_key_pem)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed)
    }
}
