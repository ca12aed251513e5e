use std::collections::HashMap;

use common::{KeyPairRecord, StoreError};
use serde::{Deserialize, Serialize};

/// Current record plus retired history for one slot name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Slot {
    pub current: Option<KeyPairRecord>,
    #[serde(default)]
    pub retired: Vec<KeyPairRecord>,
}

impl Slot {
    fn is_retired(&self, record: &KeyPairRecord) -> bool {
        !record.is_placeholder()
            && self
                .retired
                .iter()
                .any(|old| old.public_key == record.public_key)
    }
}

/// Slot bookkeeping shared by every backend. Callers hold whatever lock
/// makes a single method call atomic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct SlotTable {
    slots: HashMap<String, Slot>,
}

impl SlotTable {
    pub fn get(&self, name: &str) -> Option<KeyPairRecord> {
        self.slots.get(name).and_then(|slot| slot.current.clone())
    }

    pub fn insert(&mut self, mut record: KeyPairRecord) -> Result<(), StoreError> {
        let name = record.name.clone();
        let slot = self.slots.entry(name.clone()).or_default();

        if slot.current.is_some() {
            return Err(StoreError::Conflict { name });
        }
        if record.is_active && slot.is_retired(&record) {
            return Err(StoreError::Reactivation { name });
        }

        record.revision = 1;
        slot.current = Some(record);
        Ok(())
    }

    pub fn update(
        &mut self,
        name: &str,
        expected_revision: u64,
        mut record: KeyPairRecord,
    ) -> Result<(), StoreError> {
        let slot = self
            .slots
            .get_mut(name)
            .filter(|slot| slot.current.is_some())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })?;

        let current = match slot.current.as_ref() {
            Some(current) if current.revision == expected_revision => current,
            _ => {
                return Err(StoreError::Conflict {
                    name: name.to_string(),
                })
            }
        };

        let deactivated_in_place = !current.is_active
            && !current.is_placeholder()
            && current.public_key == record.public_key;
        if record.is_active && (deactivated_in_place || slot.is_retired(&record)) {
            return Err(StoreError::Reactivation {
                name: name.to_string(),
            });
        }

        let replaces_material =
            !current.is_placeholder() && current.public_key != record.public_key;
        if replaces_material {
            let retired = current.deactivated();
            slot.retired.push(retired);
        }

        record.name = name.to_string();
        record.revision = expected_revision + 1;
        slot.current = Some(record);
        Ok(())
    }

    pub fn retired(&self, name: &str) -> Vec<KeyPairRecord> {
        self.slots
            .get(name)
            .map(|slot| slot.retired.clone())
            .unwrap_or_default()
    }
}
