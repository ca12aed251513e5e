//! # Vault Encryption Module
//!
//! Data-protection layer for personal records: cipher primitives, a chunked
//! long-text protocol over RSA, key lifecycle management with rotation and
//! audit, tamper evidence, and credential hashing.
//!
//! ## Features
//!
//! - **Symmetric envelopes**: AES-256-CBC with a fresh IV per call
//! - **Asymmetric cipher & signer**: RSA-2048 OAEP-SHA256, PKCS#1 v1.5 signatures
//! - **Chunked envelopes**: arbitrary-length text over the RSA block limit
//! - **Key lifecycle**: placeholder, initialize, audited retrieval, forward-only rotation
//! - **Tamper evidence**: canonical records, signatures, integrity hashes
//! - **Credential hashing**: salted, iterated SHA-256
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use common::security::MemoryAuditSink;
//! use encryption::{FieldProtector, KeyLifecycleManager, ProtectionConfig};
//! use keystore::InMemoryKeyStore;
//!
//! let manager = KeyLifecycleManager::system(
//!     Arc::new(InMemoryKeyStore::new()),
//!     Arc::new(MemoryAuditSink::new()),
//! );
//! let protector = FieldProtector::new(Arc::new(manager), &ProtectionConfig::default())?;
//!
//! let envelope = protector.protect("0901234567")?;
//! assert_eq!(protector.reveal(&envelope, "advisor")?, "0901234567");
//! ```
//!
//! ## Architecture Integration
//!
//! ```text
//! FieldProtector / TamperEvidence
//!     ↓ (key material)
//! KeyLifecycleManager ──> KeyStore (keystore crate)
//!     │               └─> AuditSink (common::security)
//!     ↓ (primitives)
//! envelope ─> asymmetric      symmetric      credential
//! ```
//!
//! ## Security Considerations
//!
//! - **Oracle resistance**: every decryption failure is `DecryptionFailed`
//! - **Rotation**: old ciphertext needs the old private key, retrieved before rotating
//! - **Logging**: key material and plaintext are never logged; fingerprints are

pub mod asymmetric;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod keymanager;
pub mod protector;
pub mod symmetric;
pub mod tamper;

pub use asymmetric::{fingerprint, GeneratedKeyPair, MAX_CHUNK_BYTES};
pub use config::ProtectionConfig;
pub use credential::CredentialHasher;
pub use envelope::{ChunkedCipher, EnvelopeLayout, DEFAULT_CHUNK_THRESHOLD, MULTI_MARKER};
pub use error::{CryptoError, Result};
pub use keymanager::{InitOutcome, KeyLifecycleManager, KeyStatus, RotationOutcome, SlotState};
pub use protector::FieldProtector;
pub use symmetric::SymmetricKey;
pub use tamper::{CanonicalRecord, RecordFields, RecordSignature, TamperEvidence};

/// Encryption crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
