use anyhow::Result;
use thiserror::Error;

use crate::{AuditEntry, KeyPairRecord};

/// Failures surfaced by key store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Name already taken on insert, or revision moved underneath an update.
    #[error("key slot conflict: {name}")]
    Conflict { name: String },

    #[error("key slot not found: {name}")]
    NotFound { name: String },

    /// Write would flip retired key material back to active.
    #[error("retired key material cannot be reactivated: {name}")]
    Reactivation { name: String },

    #[error("key store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Persistence collaborator for key slots.
///
/// Implementations provide the mutual exclusion the key lifecycle relies on:
/// `insert` is unique per name, and `update` only applies when the caller's
/// `expected_revision` still matches the stored one. A successful update that
/// replaces live key material must retain the replaced record, deactivated,
/// in the slot's retired history.
pub trait KeyStore: Send + Sync {
    fn get(&self, name: &str) -> std::result::Result<Option<KeyPairRecord>, StoreError>;

    fn insert(&self, record: KeyPairRecord) -> std::result::Result<(), StoreError>;

    fn update(
        &self,
        name: &str,
        expected_revision: u64,
        record: KeyPairRecord,
    ) -> std::result::Result<(), StoreError>;

    fn retired(&self, name: &str) -> std::result::Result<Vec<KeyPairRecord>, StoreError> {
        let _ = name;
        Ok(Vec::new())
    }
}

/// Write-only audit collaborator.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<()>;
}
