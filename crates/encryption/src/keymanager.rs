//! Key Lifecycle Management
//!
//! Generates, stores, retrieves, and rotates the RSA key pair held in one
//! named slot of the injected `KeyStore`, emitting audit entries to the
//! injected `AuditSink`.
//!
//! ## Slot States
//!
//! ```text
//! Uninitialized -> Placeholder -> Active -> (rotate) -> Active(new)
//!       \___________________________/          |
//!                                              +-> previous record retired, never reactivated
//! ```
//!
//! ## Concurrency Model
//!
//! No in-process locks. Mutual exclusion comes from the store: inserts are
//! unique per name and updates compare revisions. Racing `initialize` calls
//! therefore produce one winner; losers re-read and observe the winner's
//! key. Rotation replaces the live record with a single conditional update,
//! so readers see either the old or the new key, never an empty slot.
//!
//! ## Audit Policy
//!
//! Audit appends are attempted for every generation, private-key access, and
//! rotation. A failing sink is logged and otherwise ignored; it never blocks
//! or rolls back the key operation.

use std::sync::Arc;

use common::{
    traits::{AuditSink, KeyStore},
    unix_ts, AuditEntry, AuditEvent, KeyPairRecord, PrivateKeyPem, StoreError, SYSTEM_MAIN_KEY,
};
use tracing::{debug, info, warn};

use crate::asymmetric::{self, fingerprint};
use crate::error::{CryptoError, Result};

/// Actor recorded for lifecycle work not attributable to a caller
pub const SYSTEM_ACTOR: &str = "system";

/// Bound on compare-and-swap retries against the store
const MAX_STORE_ATTEMPTS: usize = 5;

/// Usage stamps newer than this are left alone, so hot read paths do not
/// bump the slot revision on every call
pub const USAGE_STAMP_GRANULARITY_SECS: u64 = 60;

/// Observable state of a key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No record stored under the slot name
    Uninitialized,
    /// Record present but carrying no key material
    Placeholder,
    /// Live key material
    Active,
    /// Record present but deactivated; the next `initialize` replaces it
    Inactive,
}

impl SlotState {
    fn of(record: Option<&KeyPairRecord>) -> Self {
        match record {
            None => SlotState::Uninitialized,
            Some(r) if r.is_placeholder() => SlotState::Placeholder,
            Some(r) if r.is_active => SlotState::Active,
            Some(_) => SlotState::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Uninitialized => "uninitialized",
            SlotState::Placeholder => "placeholder",
            SlotState::Active => "active",
            SlotState::Inactive => "inactive",
        }
    }
}

/// What `initialize` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// A live key already existed (possibly created by a racing caller)
    AlreadyInitialized { fingerprint: String },
    /// This call generated and stored the key
    Generated { fingerprint: String },
}

impl InitOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            InitOutcome::AlreadyInitialized { fingerprint }
            | InitOutcome::Generated { fingerprint } => fingerprint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub previous_fingerprint: String,
    pub new_fingerprint: String,
    pub rotated_at: u64,
}

/// Administrative view of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    pub name: String,
    pub state: SlotState,
    pub fingerprint: Option<String>,
    pub algorithm: Option<String>,
    pub created_at: Option<u64>,
    pub last_used_at: Option<u64>,
    pub retired_count: usize,
}

/// Key Lifecycle Manager
///
/// Owns access to the private key of one slot. The private key leaves the
/// manager only through `private_key`, which is always audited.
pub struct KeyLifecycleManager {
    name: String,
    store: Arc<dyn KeyStore>,
    audit: Arc<dyn AuditSink>,
}

impl KeyLifecycleManager {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn KeyStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            audit,
        }
    }

    /// Manager for the `SYSTEM_MAIN_KEY` slot
    pub fn system(store: Arc<dyn KeyStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(SYSTEM_MAIN_KEY, store, audit)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Result<SlotState> {
        let record = self.store.get(&self.name)?;
        Ok(SlotState::of(record.as_ref()))
    }

    /// True iff the slot holds an active, non-placeholder key.
    /// A store failure reads as "not initialized".
    pub fn is_initialized(&self) -> bool {
        match self.store.get(&self.name) {
            Ok(record) => record.is_some_and(|r| r.is_live()),
            Err(err) => {
                warn!(key = %self.name, error = %err, "key store unavailable; treating slot as uninitialized");
                false
            }
        }
    }

    /// Insert an un-initialized placeholder if the slot is empty.
    ///
    /// Returns whether this call created it.
    pub fn provision_placeholder(&self, actor: &str) -> Result<bool> {
        match self.store.insert(KeyPairRecord::placeholder(&self.name)) {
            Ok(()) => {
                info!(key = %self.name, "provisioned placeholder key slot");
                self.emit(AuditEntry::new(
                    actor,
                    AuditEvent::PlaceholderProvisioned,
                    &self.name,
                    "slot reserved without key material",
                ));
                Ok(true)
            }
            Err(StoreError::Conflict { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Ensure the slot holds a live key, generating one if needed.
    pub fn initialize(&self) -> Result<InitOutcome> {
        self.initialize_as(SYSTEM_ACTOR)
    }

    /// `initialize` with an explicit actor for the audit trail.
    ///
    /// Idempotent under concurrency: when several callers race on an empty
    /// or placeholder slot, exactly one store write succeeds and every other
    /// caller returns `AlreadyInitialized` with the winner's fingerprint.
    pub fn initialize_as(&self, actor: &str) -> Result<InitOutcome> {
        for attempt in 1..=MAX_STORE_ATTEMPTS {
            let existing = self.store.get(&self.name)?;
            if let Some(record) = existing.as_ref().filter(|r| r.is_live()) {
                return Ok(InitOutcome::AlreadyInitialized {
                    fingerprint: fingerprint(&record.public_key),
                });
            }

            let pair = asymmetric::generate_key_pair()?;
            let new_fingerprint = pair.fingerprint();
            let record = KeyPairRecord::active(
                &self.name,
                pair.public_key,
                pair.private_key,
                "system signing/encryption key",
            );

            let written = match existing.as_ref() {
                None => self.store.insert(record),
                Some(stale) => self.store.update(&self.name, stale.revision, record),
            };

            match written {
                Ok(()) => {
                    let replaced = SlotState::of(existing.as_ref());
                    info!(
                        key = %self.name,
                        fingerprint = %new_fingerprint,
                        replaced = replaced.as_str(),
                        "generated key pair"
                    );
                    self.emit(AuditEntry::new(
                        actor,
                        AuditEvent::KeyGenerated,
                        &self.name,
                        format!(
                            "generated key {new_fingerprint} (slot was {})",
                            replaced.as_str()
                        ),
                    ));
                    return Ok(InitOutcome::Generated {
                        fingerprint: new_fingerprint,
                    });
                }
                Err(err) if err.is_conflict() => {
                    debug!(key = %self.name, attempt, "lost key creation race; re-reading slot");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Conflict {
            name: self.name.clone(),
        }
        .into())
    }

    fn active_record(&self) -> Result<KeyPairRecord> {
        self.store
            .get(&self.name)?
            .filter(|r| r.is_live())
            .ok_or_else(|| CryptoError::KeyNotFound {
                name: self.name.clone(),
            })
    }

    pub fn public_key(&self) -> Result<String> {
        self.active_record().map(|r| r.public_key)
    }

    /// Retrieve the private key. Every call is audited as an access by `actor`.
    pub fn private_key(&self, actor: &str) -> Result<PrivateKeyPem> {
        let record = self.active_record()?;
        self.emit(AuditEntry::new(
            actor,
            AuditEvent::PrivateKeyAccessed,
            &self.name,
            format!("private key {} retrieved", fingerprint(&record.public_key)),
        ));
        Ok(record.private_key.clone())
    }

    /// Replace the live key with a new one, retiring the old one permanently.
    ///
    /// Data encrypted under the old key is only recoverable by callers who
    /// retrieved the old private key before rotating.
    pub fn rotate(&self, actor: &str, reason: &str) -> Result<RotationOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CryptoError::RotationReasonRequired);
        }

        let mut current = self.active_record()?;
        let previous_fingerprint = fingerprint(&current.public_key);

        let pair = asymmetric::generate_key_pair()?;
        let new_fingerprint = pair.fingerprint();
        let replacement = KeyPairRecord::active(
            &self.name,
            pair.public_key,
            pair.private_key,
            format!("rotated from {previous_fingerprint}: {reason}"),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .update(&self.name, current.revision, replacement.clone())
            {
                Ok(()) => break,
                Err(err) if err.is_conflict() && attempt < MAX_STORE_ATTEMPTS => {
                    // A usage touch may have bumped the revision; anything else
                    // means another rotation won and this one must not clobber it.
                    let latest = self.active_record()?;
                    if latest.public_key != current.public_key {
                        return Err(err.into());
                    }
                    current = latest;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let rotated_at = unix_ts();
        info!(
            key = %self.name,
            previous = %previous_fingerprint,
            new = %new_fingerprint,
            "rotated key pair"
        );
        self.emit(AuditEntry::new(
            actor,
            AuditEvent::KeyDeactivated,
            &self.name,
            format!("key {previous_fingerprint} deactivated"),
        ));
        self.emit(AuditEntry::new(
            actor,
            AuditEvent::KeyRotated,
            &self.name,
            format!("{previous_fingerprint} -> {new_fingerprint}: {reason}"),
        ));

        Ok(RotationOutcome {
            previous_fingerprint,
            new_fingerprint,
            rotated_at,
        })
    }

    /// Stamp the live key's last-used time at most once per
    /// [`USAGE_STAMP_GRANULARITY_SECS`]. Best-effort; never fails.
    pub fn record_usage(&self) {
        let touched = (|| -> Result<()> {
            let mut record = self.active_record()?;
            let now = unix_ts();
            if let Some(last) = record.last_used_at {
                if now.saturating_sub(last) < USAGE_STAMP_GRANULARITY_SECS {
                    return Ok(());
                }
            }
            let revision = record.revision;
            record.last_used_at = Some(now);
            self.store.update(&self.name, revision, record)?;
            Ok(())
        })();

        if let Err(err) = touched {
            debug!(key = %self.name, error = %err, "skipped key usage stamp");
        }
    }

    pub fn status(&self) -> Result<KeyStatus> {
        let record = self.store.get(&self.name)?;
        let retired_count = self.store.retired(&self.name)?.len();
        let state = SlotState::of(record.as_ref());

        let live = record.as_ref().filter(|r| !r.is_placeholder());
        Ok(KeyStatus {
            name: self.name.clone(),
            state,
            fingerprint: live.map(|r| fingerprint(&r.public_key)),
            algorithm: live.map(|r| r.algorithm.clone()),
            created_at: live.map(|r| r.created_at),
            last_used_at: live.and_then(|r| r.last_used_at),
            retired_count,
        })
    }

    fn emit(&self, entry: AuditEntry) {
        let event = entry.event;
        if let Err(err) = self.audit.append(entry) {
            warn!(
                key = %self.name,
                event = %event,
                error = %err,
                "audit append failed; continuing"
            );
        }
    }
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("name", &self.name)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use common::security::MemoryAuditSink;
    use keystore::InMemoryKeyStore;
    use tracing_test::traced_test;

    struct FailingAudit;

    impl AuditSink for FailingAudit {
        fn append(&self, _entry: AuditEntry) -> anyhow::Result<()> {
            Err(anyhow!("audit disk full"))
        }
    }

    struct BrokenStore;

    impl KeyStore for BrokenStore {
        fn get(&self, _name: &str) -> std::result::Result<Option<KeyPairRecord>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        fn insert(&self, _record: KeyPairRecord) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        fn update(
            &self,
            _name: &str,
            _expected_revision: u64,
            _record: KeyPairRecord,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    fn manager() -> (KeyLifecycleManager, InMemoryKeyStore, MemoryAuditSink) {
        let store = InMemoryKeyStore::new();
        let audit = MemoryAuditSink::new();
        let manager =
            KeyLifecycleManager::system(Arc::new(store.clone()), Arc::new(audit.clone()));
        (manager, store, audit)
    }

    #[test]
    fn test_fresh_slot_is_uninitialized() {
        let (manager, _, _) = manager();
        assert_eq!(manager.state().unwrap(), SlotState::Uninitialized);
        assert!(!manager.is_initialized());
        assert!(matches!(
            manager.public_key(),
            Err(CryptoError::KeyNotFound { .. })
        ));
        assert!(matches!(
            manager.private_key("tester"),
            Err(CryptoError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (manager, _, audit) = manager();

        let first = manager.initialize().unwrap();
        assert!(matches!(first, InitOutcome::Generated { .. }));
        assert!(manager.is_initialized());

        let second = manager.initialize().unwrap();
        assert!(matches!(second, InitOutcome::AlreadyInitialized { .. }));
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(audit.count(AuditEvent::KeyGenerated), 1);
    }

    #[test]
    fn test_placeholder_is_overwritten_in_place() {
        let (manager, store, audit) = manager();

        assert!(manager.provision_placeholder("installer").unwrap());
        assert!(!manager.provision_placeholder("installer").unwrap());
        assert_eq!(manager.state().unwrap(), SlotState::Placeholder);
        assert!(!manager.is_initialized());
        assert!(matches!(
            manager.public_key(),
            Err(CryptoError::KeyNotFound { .. })
        ));

        manager.initialize().unwrap();

        let record = store.get(SYSTEM_MAIN_KEY).unwrap().unwrap();
        assert_eq!(record.name, SYSTEM_MAIN_KEY);
        assert!(record.is_live());
        assert_eq!(record.revision, 2);
        assert!(store.retired(SYSTEM_MAIN_KEY).unwrap().is_empty());
        assert_eq!(audit.count(AuditEvent::PlaceholderProvisioned), 1);
        assert_eq!(audit.count(AuditEvent::KeyGenerated), 1);
    }

    #[test]
    fn test_private_key_access_is_audited() {
        let (manager, _, audit) = manager();
        manager.initialize().unwrap();

        let private = manager.private_key("registrar").unwrap();
        assert!(private.expose().contains("BEGIN PRIVATE KEY"));

        let accesses: Vec<_> = audit
            .entries()
            .into_iter()
            .filter(|e| e.event == AuditEvent::PrivateKeyAccessed)
            .collect();
        assert_eq!(accesses.len(), 1);
        assert_eq!(accesses[0].actor, "registrar");
        assert_eq!(accesses[0].entity_ref, SYSTEM_MAIN_KEY);
    }

    #[test]
    #[traced_test]
    fn test_audit_failure_does_not_block_retrieval() {
        let store = InMemoryKeyStore::new();
        let manager = KeyLifecycleManager::system(Arc::new(store), Arc::new(FailingAudit));

        manager.initialize().unwrap();
        let private = manager.private_key("registrar");

        assert!(private.is_ok());
        assert!(logs_contain("audit append failed"));
    }

    #[test]
    fn test_rotation_changes_public_key_and_retires_old() {
        let (manager, store, audit) = manager();
        manager.initialize().unwrap();

        let old_public = manager.public_key().unwrap();
        let old_private = manager.private_key("admin").unwrap();
        let ciphertext = asymmetric::encrypt(b"pre-rotation", &old_public).unwrap();

        let outcome = manager.rotate("admin", "scheduled yearly rotation").unwrap();
        let new_public = manager.public_key().unwrap();

        assert_ne!(old_public, new_public);
        assert_eq!(outcome.previous_fingerprint, fingerprint(&old_public));
        assert_eq!(outcome.new_fingerprint, fingerprint(&new_public));

        // Retained old key still opens old data; the new key does not
        assert_eq!(
            asymmetric::decrypt(&ciphertext, &old_private).unwrap(),
            b"pre-rotation"
        );
        let new_private = manager.private_key("admin").unwrap();
        assert!(matches!(
            asymmetric::decrypt(&ciphertext, &new_private),
            Err(CryptoError::DecryptionFailed)
        ));

        let retired = store.retired(SYSTEM_MAIN_KEY).unwrap();
        assert_eq!(retired.len(), 1);
        assert!(!retired[0].is_active);
        assert_eq!(retired[0].public_key, old_public);

        let rotated: Vec<_> = audit
            .entries()
            .into_iter()
            .filter(|e| e.event == AuditEvent::KeyRotated)
            .collect();
        assert_eq!(rotated.len(), 1);
        assert!(rotated[0].description.contains("scheduled yearly rotation"));
        assert_eq!(audit.count(AuditEvent::KeyDeactivated), 1);
    }

    #[test]
    fn test_rotation_requires_reason_and_key() {
        let (manager, _, _) = manager();
        assert!(matches!(
            manager.rotate("admin", "   "),
            Err(CryptoError::RotationReasonRequired)
        ));
        assert!(matches!(
            manager.rotate("admin", "compromise"),
            Err(CryptoError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_record_usage_stamps_and_survives_rotation() {
        let (manager, store, _) = manager();
        manager.record_usage(); // no key yet: silently skipped

        manager.initialize().unwrap();
        manager.record_usage();
        let record = store.get(SYSTEM_MAIN_KEY).unwrap().unwrap();
        assert!(record.last_used_at.is_some());
        assert!(store.retired(SYSTEM_MAIN_KEY).unwrap().is_empty());

        // Revision moved under the usage stamp; rotation re-reads and proceeds
        manager.rotate("admin", "after use").unwrap();
        assert_eq!(store.retired(SYSTEM_MAIN_KEY).unwrap().len(), 1);
    }

    #[test]
    fn test_record_usage_is_coarsened() {
        let (manager, store, _) = manager();
        manager.initialize().unwrap();

        manager.record_usage();
        let stamped = store.get(SYSTEM_MAIN_KEY).unwrap().unwrap();
        for _ in 0..10 {
            manager.record_usage();
        }
        let after = store.get(SYSTEM_MAIN_KEY).unwrap().unwrap();
        assert_eq!(after.revision, stamped.revision);
        assert_eq!(after.last_used_at, stamped.last_used_at);

        // A stamp older than the granularity is refreshed
        let mut stale = after.clone();
        stale.last_used_at = Some(unix_ts() - USAGE_STAMP_GRANULARITY_SECS - 5);
        store.update(SYSTEM_MAIN_KEY, after.revision, stale).unwrap();
        manager.record_usage();
        let refreshed = store.get(SYSTEM_MAIN_KEY).unwrap().unwrap();
        assert_eq!(refreshed.revision, after.revision + 2);
        assert!(refreshed.last_used_at.unwrap() + USAGE_STAMP_GRANULARITY_SECS > unix_ts());
    }

    #[test]
    fn test_status_report() {
        let (manager, _, _) = manager();
        let empty = manager.status().unwrap();
        assert_eq!(empty.state, SlotState::Uninitialized);
        assert!(empty.fingerprint.is_none());

        manager.initialize().unwrap();
        manager.rotate("admin", "test").unwrap();

        let status = manager.status().unwrap();
        assert_eq!(status.name, SYSTEM_MAIN_KEY);
        assert_eq!(status.state, SlotState::Active);
        assert_eq!(
            status.fingerprint.as_deref(),
            Some(fingerprint(&manager.public_key().unwrap()).as_str())
        );
        assert_eq!(status.retired_count, 1);
        assert!(status.created_at.is_some());
    }

    #[test]
    #[traced_test]
    fn test_store_outage_reads_as_uninitialized() {
        let manager =
            KeyLifecycleManager::system(Arc::new(BrokenStore), Arc::new(MemoryAuditSink::new()));
        assert!(!manager.is_initialized());
        assert!(logs_contain("key store unavailable"));
        assert!(matches!(
            manager.initialize(),
            Err(CryptoError::Store(StoreError::Backend(_)))
        ));
    }

    #[test]
    fn test_named_slots_are_independent() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let main = KeyLifecycleManager::system(Arc::clone(&store), Arc::clone(&audit));
        let tenant = KeyLifecycleManager::new("TENANT_7_KEY", store, audit);

        main.initialize().unwrap();
        assert!(main.is_initialized());
        assert!(!tenant.is_initialized());
    }

    #[test]
    fn test_debug_redacts() {
        let (manager, _, _) = manager();
        let debug = format!("{:?}", manager);
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains(SYSTEM_MAIN_KEY));
    }
}
