//! Field Protection Facade
//!
//! Binds the chunked envelope protocol to the managed key pair so callers
//! can protect and reveal text fields without handling key material.
//!
//! `protect` initializes the key slot lazily. When initialization fails the
//! error is logged and returned, and the next call tries again. `reveal`
//! never generates a key: an empty slot is `KeyNotFound`.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::ProtectionConfig;
use crate::envelope::ChunkedCipher;
use crate::error::Result;
use crate::keymanager::KeyLifecycleManager;

#[derive(Debug, Clone)]
pub struct FieldProtector {
    manager: Arc<KeyLifecycleManager>,
    cipher: ChunkedCipher,
    placeholder: String,
}

impl FieldProtector {
    pub fn new(manager: Arc<KeyLifecycleManager>, config: &ProtectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            cipher: config.chunked_cipher()?,
            placeholder: config.display_placeholder.clone(),
        })
    }

    pub fn manager(&self) -> &Arc<KeyLifecycleManager> {
        &self.manager
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    fn ensure_key(&self) -> Result<()> {
        if self.manager.is_initialized() {
            return Ok(());
        }
        match self.manager.initialize() {
            Ok(outcome) => {
                debug!(key = %self.manager.name(), fingerprint = outcome.fingerprint(), "key ready");
                Ok(())
            }
            Err(err) => {
                error!(key = %self.manager.name(), error = %err, "key initialization failed; will retry on next use");
                Err(err)
            }
        }
    }

    /// Encrypt `plaintext` under the active public key
    pub fn protect(&self, plaintext: &str) -> Result<String> {
        self.ensure_key()?;
        let public_key = self.manager.public_key()?;
        let envelope = self.cipher.encrypt_text(plaintext, &public_key)?;
        self.manager.record_usage();
        Ok(envelope)
    }

    /// Decrypt `envelope`; the private-key retrieval is audited under `actor`
    pub fn reveal(&self, envelope: &str, actor: &str) -> Result<String> {
        let private_key = self.manager.private_key(actor)?;
        let plaintext = self.cipher.decrypt_text(envelope, &private_key)?;
        self.manager.record_usage();
        Ok(plaintext)
    }

    /// `reveal` for display paths: any failure is logged and replaced by the
    /// configured placeholder
    pub fn reveal_or_placeholder(&self, envelope: &str, actor: &str) -> String {
        match self.reveal(envelope, actor) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(
                    key = %self.manager.name(),
                    actor,
                    envelope_len = envelope.len(),
                    error = %err,
                    "substituting placeholder for undecryptable field"
                );
                self.placeholder.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::is_multi_block;
    use crate::error::CryptoError;
    use common::security::MemoryAuditSink;
    use common::{AuditEvent, KeyPairRecord, KeyStore, StoreError, SYSTEM_MAIN_KEY};
    use keystore::InMemoryKeyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Fails the first `failures` inserts, then delegates
    struct FlakyStore {
        inner: InMemoryKeyStore,
        failures: AtomicUsize,
    }

    impl KeyStore for FlakyStore {
        fn get(&self, name: &str) -> std::result::Result<Option<KeyPairRecord>, StoreError> {
            self.inner.get(name)
        }

        fn insert(&self, record: KeyPairRecord) -> std::result::Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("database locked".into()));
            }
            self.inner.insert(record)
        }

        fn update(
            &self,
            name: &str,
            expected_revision: u64,
            record: KeyPairRecord,
        ) -> std::result::Result<(), StoreError> {
            self.inner.update(name, expected_revision, record)
        }
    }

    fn protector() -> (FieldProtector, MemoryAuditSink) {
        let audit = MemoryAuditSink::new();
        let manager = KeyLifecycleManager::system(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(audit.clone()),
        );
        let protector =
            FieldProtector::new(Arc::new(manager), &ProtectionConfig::default()).unwrap();
        (protector, audit)
    }

    #[test]
    fn test_protect_initializes_lazily() {
        let (protector, audit) = protector();
        assert!(!protector.manager().is_initialized());

        let envelope = protector.protect("0901234567").unwrap();
        assert!(protector.manager().is_initialized());
        assert_eq!(protector.reveal(&envelope, "advisor").unwrap(), "0901234567");
        assert_eq!(audit.count(AuditEvent::KeyGenerated), 1);
        assert_eq!(audit.count(AuditEvent::PrivateKeyAccessed), 1);
    }

    #[test]
    fn test_long_field_uses_chunking() {
        let (protector, _) = protector();
        let essay = "Tham gia hiến máu nhân đạo, hỗ trợ tân sinh viên. ".repeat(60);

        let envelope = protector.protect(&essay).unwrap();
        assert!(is_multi_block(&envelope));
        assert_eq!(protector.reveal(&envelope, "advisor").unwrap(), essay);
    }

    #[test]
    fn test_usage_is_recorded() {
        let (protector, _) = protector();
        protector.protect("x").unwrap();
        let status = protector.manager().status().unwrap();
        assert!(status.last_used_at.is_some());
    }

    #[test]
    fn test_reveal_surfaces_errors() {
        let (protector, _) = protector();
        protector.manager().initialize().unwrap();
        assert!(matches!(
            protector.reveal("", "advisor"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            protector.reveal("QUJD", "advisor"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_reveal_on_empty_slot_does_not_generate_key() {
        let (protector, audit) = protector();

        assert!(matches!(
            protector.reveal("QUJD", "advisor"),
            Err(CryptoError::KeyNotFound { .. })
        ));
        assert_eq!(protector.reveal_or_placeholder("QUJD", "advisor"), "[encrypted]");

        assert!(!protector.manager().is_initialized());
        assert_eq!(audit.count(AuditEvent::KeyGenerated), 0);
        assert_eq!(audit.count(AuditEvent::PrivateKeyAccessed), 0);
    }

    #[test]
    fn test_reveal_on_placeholder_slot_does_not_generate_key() {
        let (protector, audit) = protector();
        protector.manager().provision_placeholder("installer").unwrap();

        assert!(matches!(
            protector.reveal("QUJD", "advisor"),
            Err(CryptoError::KeyNotFound { .. })
        ));
        assert!(!protector.manager().is_initialized());
        assert_eq!(audit.count(AuditEvent::KeyGenerated), 0);
    }

    #[test]
    #[traced_test]
    fn test_reveal_or_placeholder_logs_and_substitutes() {
        let (protector, _) = protector();
        let envelope = protector.protect("B2012345").unwrap();

        assert_eq!(protector.reveal_or_placeholder(&envelope, "advisor"), "B2012345");
        assert_eq!(
            protector.reveal_or_placeholder("[MULTI]QUJD|", "advisor"),
            "[encrypted]"
        );
        assert!(logs_contain("substituting placeholder"));
    }

    #[test]
    fn test_custom_placeholder() {
        let config = ProtectionConfig {
            display_placeholder: "(hidden)".into(),
            ..ProtectionConfig::default()
        };
        let manager = KeyLifecycleManager::system(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(MemoryAuditSink::new()),
        );
        let protector = FieldProtector::new(Arc::new(manager), &config).unwrap();
        assert_eq!(protector.reveal_or_placeholder("@@@", "advisor"), "(hidden)");
    }

    #[test]
    #[traced_test]
    fn test_initialization_failure_is_retried() {
        let store = FlakyStore {
            inner: InMemoryKeyStore::new(),
            failures: AtomicUsize::new(1),
        };
        let manager = KeyLifecycleManager::system(Arc::new(store), Arc::new(MemoryAuditSink::new()));
        let protector =
            FieldProtector::new(Arc::new(manager), &ProtectionConfig::default()).unwrap();

        assert!(matches!(
            protector.protect("first"),
            Err(CryptoError::Store(StoreError::Backend(_)))
        ));
        assert!(logs_contain("key initialization failed"));
        assert!(!protector.manager().is_initialized());

        let envelope = protector.protect("second").unwrap();
        assert_eq!(protector.reveal(&envelope, "advisor").unwrap(), "second");
        assert_eq!(protector.manager().name(), SYSTEM_MAIN_KEY);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ProtectionConfig {
            chunk_threshold: 0,
            ..ProtectionConfig::default()
        };
        let manager = KeyLifecycleManager::system(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(MemoryAuditSink::new()),
        );
        assert!(FieldProtector::new(Arc::new(manager), &config).is_err());
    }
}
