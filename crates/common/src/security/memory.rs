use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::{traits::AuditSink, AuditEntry, AuditEvent};

/// Audit sink that keeps entries in memory. Used by embedders without a log
/// file and by tests that assert on emitted events.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink mutex poisoned").clone()
    }

    pub fn count(&self, event: AuditEvent) -> usize {
        self.entries
            .lock()
            .expect("audit sink mutex poisoned")
            .iter()
            .filter(|entry| entry.event == event)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .expect("audit sink mutex poisoned")
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_counts() {
        let sink = MemoryAuditSink::new();
        sink.append(AuditEntry::new("a", AuditEvent::KeyGenerated, "k", ""))
            .unwrap();
        sink.append(AuditEntry::new("a", AuditEvent::KeyRotated, "k", "r"))
            .unwrap();
        sink.append(AuditEntry::new("b", AuditEvent::KeyGenerated, "k", ""))
            .unwrap();

        assert_eq!(sink.entries().len(), 3);
        assert_eq!(sink.count(AuditEvent::KeyGenerated), 2);
        assert_eq!(sink.count(AuditEvent::PrivateKeyAccessed), 0);
    }

    #[test]
    fn clones_share_entries() {
        let sink = MemoryAuditSink::new();
        let clone = sink.clone();
        clone
            .append(AuditEntry::new("a", AuditEvent::KeyDeactivated, "k", ""))
            .unwrap();
        assert_eq!(sink.entries().len(), 1);
    }
}
