//! Tamper Evidence for Stored Records
//!
//! Records are reduced to a canonical, field-ordered string and then either
//! signed with the managed key or hashed for later comparison.
//!
//! ## Canonical Form
//!
//! ```text
//! FIELD_1=value_1|FIELD_2=value_2|...|FIELD_n=value_n
//! ```
//!
//! Field order is fixed by the record type. Absent and empty values both
//! render as an empty value and are never omitted. `\` and `|` inside values
//! are backslash-escaped so no value can forge a field boundary.
//!
//! The canonical form is independent of any general-purpose serializer so
//! signatures stay byte-exact across releases.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::asymmetric;
use crate::error::{CryptoError, Result};
use crate::keymanager::KeyLifecycleManager;

/// Separator between canonical fields
pub const FIELD_SEPARATOR: char = '|';

/// Characters of the signature kept in `RecordSignature::preview`
pub const PREVIEW_CHARS: usize = 16;

/// Actor recorded when the service retrieves the signing key
pub const DEFAULT_SIGNING_ACTOR: &str = "tamper-evidence";

const HASH_HEX_LEN: usize = 64;

/// A record with a fixed set of significant fields
pub trait CanonicalRecord {
    /// Significant fields as `(NAME, value)` pairs, in canonical order
    fn canonical_fields(&self) -> Vec<(&str, Option<String>)>;
}

/// Ad-hoc record built field by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    fields: Vec<(String, Option<String>)>,
}

impl RecordFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), Some(value.to_string())));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.fields
            .push((name.into(), value.map(|v| v.to_string())));
        self
    }
}

impl CanonicalRecord for RecordFields {
    fn canonical_fields(&self) -> Vec<(&str, Option<String>)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect()
    }
}

fn escape_into(out: &mut String, value: &str) {
    for ch in value.chars() {
        if ch == '\\' || ch == FIELD_SEPARATOR {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Render `record` in canonical form
pub fn canonicalize<R: CanonicalRecord + ?Sized>(record: &R) -> String {
    let mut out = String::new();
    for (index, (name, value)) in record.canonical_fields().into_iter().enumerate() {
        if index > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(name);
        out.push('=');
        escape_into(&mut out, value.as_deref().unwrap_or_default());
    }
    out
}

/// Signature over a canonical record, with the signing key's slot name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSignature {
    /// Base64 PKCS#1 v1.5 SHA-256 signature
    pub signature: String,
    pub key_name: String,
    /// Truncated signature for display
    pub preview: String,
}

impl RecordSignature {
    pub fn new(signature: String, key_name: impl Into<String>) -> Self {
        let preview = preview_of(&signature);
        Self {
            signature,
            key_name: key_name.into(),
            preview,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn preview_of(signature: &str) -> String {
    let head: String = signature.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

/// SHA-256 of the canonical form, lowercase hex
pub fn integrity_hash<R: CanonicalRecord + ?Sized>(record: &R) -> String {
    asymmetric::hash(canonicalize(record).as_bytes())
}

/// Compare a stored hash against `record`'s current hash.
///
/// Returns `true` when the record must be treated as tampered: on mismatch,
/// and also when the stored hash is not a well-formed SHA-256 hex digest.
pub fn detect_tamper<R: CanonicalRecord + ?Sized>(original_hash: &str, record: &R) -> bool {
    let stored = original_hash.trim().to_ascii_lowercase();
    if stored.len() != HASH_HEX_LEN || !stored.bytes().all(|b| b.is_ascii_hexdigit()) {
        warn!(
            stored_len = stored.len(),
            "stored integrity hash is malformed; treating record as tampered"
        );
        return true;
    }

    let current = integrity_hash(record);
    let matches: bool = current.as_bytes().ct_eq(stored.as_bytes()).into();
    if !matches {
        debug!("integrity hash mismatch");
    }
    !matches
}

/// Signs and verifies records with the managed key pair
#[derive(Debug, Clone)]
pub struct TamperEvidence {
    manager: Arc<KeyLifecycleManager>,
    actor: String,
}

impl TamperEvidence {
    pub fn new(manager: Arc<KeyLifecycleManager>) -> Self {
        Self {
            manager,
            actor: DEFAULT_SIGNING_ACTOR.to_string(),
        }
    }

    /// Actor recorded in the audit trail for each signing-key retrieval
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn sign<R: CanonicalRecord + ?Sized>(&self, record: &R) -> Result<RecordSignature> {
        let canonical = canonicalize(record);
        let private_key = self.manager.private_key(&self.actor)?;
        let signature = asymmetric::sign(canonical.as_bytes(), &private_key)?;
        self.manager.record_usage();

        debug!(key = %self.manager.name(), canonical_len = canonical.len(), "signed record");
        Ok(RecordSignature::new(signature, self.manager.name()))
    }

    /// `false` for any mismatch, undecodable signature, or missing key
    pub fn verify<R: CanonicalRecord + ?Sized>(&self, record: &R, signature: &str) -> bool {
        let public_key = match self.manager.public_key() {
            Ok(key) => key,
            Err(err) => {
                warn!(key = %self.manager.name(), error = %err, "cannot verify record without a public key");
                return false;
            }
        };
        asymmetric::verify(canonicalize(record).as_bytes(), signature, &public_key)
    }

    /// Like `verify`, reporting a failed check as `SignatureInvalid`
    pub fn verify_strict<R: CanonicalRecord + ?Sized>(
        &self,
        record: &R,
        signature: &str,
    ) -> Result<()> {
        if self.verify(record, signature) {
            Ok(())
        } else {
            Err(CryptoError::SignatureInvalid)
        }
    }
}
