use std::sync::{Arc, RwLock};

use common::{traits::KeyStore, KeyPairRecord, StoreError};

mod file;
mod slots;

pub use file::FileKeyStore;
use slots::SlotTable;

/// In-memory key store used for testing and embedding.
///
/// The write lock is held for the whole of each insert/update, which gives
/// the unique-insert and compare-revision guarantees concurrent callers of
/// the key lifecycle depend on.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<SlotTable>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn get(&self, name: &str) -> Result<Option<KeyPairRecord>, StoreError> {
        let guard = self.inner.read().expect("in-memory key store lock poisoned");
        Ok(guard.get(name))
    }

    fn insert(&self, record: KeyPairRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("in-memory key store lock poisoned");
        guard.insert(record)
    }

    fn update(
        &self,
        name: &str,
        expected_revision: u64,
        record: KeyPairRecord,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("in-memory key store lock poisoned");
        guard.update(name, expected_revision, record)
    }

    fn retired(&self, name: &str) -> Result<Vec<KeyPairRecord>, StoreError> {
        let guard = self.inner.read().expect("in-memory key store lock poisoned");
        Ok(guard.retired(name))
    }
}
