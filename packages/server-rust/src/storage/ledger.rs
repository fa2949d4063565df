//! In-memory [`OutboxLedger`] backed by [`DashMap`].
//!
//! Per-key operations are atomic through `DashMap`'s sharded locking, which
//! satisfies the ledger concurrency contract. Contents are lost on restart;
//! use the `PostgreSQL` ledger when replay must survive a process crash.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use employee_core::OutboxRecord;

use crate::traits::OutboxLedger;

/// Outbox ledger held in process memory.
pub struct MemoryOutboxLedger {
    records: DashMap<String, OutboxRecord>,
}

impl MemoryOutboxLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of records awaiting a publisher confirm.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether a record exists for the given correlation id.
    #[must_use]
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.records.contains_key(correlation_id)
    }
}

impl Default for MemoryOutboxLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxLedger for MemoryOutboxLedger {
    async fn find(&self, correlation_id: &str) -> anyhow::Result<Option<OutboxRecord>> {
        Ok(self.records.get(correlation_id).map(|r| r.clone()))
    }

    async fn save(&self, record: OutboxRecord) -> anyhow::Result<()> {
        // First write wins: the stored payload is what replays return.
        if let Entry::Vacant(slot) = self.records.entry(record.correlation_id.clone()) {
            slot.insert(record);
        }
        Ok(())
    }

    async fn delete(&self, correlation_id: &str) -> anyhow::Result<()> {
        self.records.remove(correlation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_find_delete_lifecycle() {
        let ledger = MemoryOutboxLedger::new();
        assert!(ledger.find("c1").await.unwrap().is_none());

        ledger
            .save(OutboxRecord::new("c1", "{\"success\":true}", Some("q".into())))
            .await
            .unwrap();
        let found = ledger.find("c1").await.unwrap().unwrap();
        assert_eq!(found.payload, "{\"success\":true}");
        assert_eq!(found.reply_to.as_deref(), Some("q"));

        ledger.delete("c1").await.unwrap();
        assert!(ledger.find("c1").await.unwrap().is_none());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn save_keeps_first_payload() {
        let ledger = MemoryOutboxLedger::new();
        ledger.save(OutboxRecord::new("c1", "first", None)).await.unwrap();
        ledger.save(OutboxRecord::new("c1", "second", None)).await.unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.find("c1").await.unwrap().unwrap().payload, "first");
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let ledger = MemoryOutboxLedger::new();
        ledger.delete("never-saved").await.unwrap();
        assert!(ledger.is_empty());
    }
}
