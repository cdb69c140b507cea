use std::sync::RwLock;

use async_trait::async_trait;

use gloria_audit::{AuditQuery, AuditRecord};
use gloria_core::{Page, PageRequest};

use super::AuditStore;
use crate::store::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let mut records = self.records.write()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::conflict(format!("audit record {} already exists", record.id)));
        }
        records.push(record);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery, page: PageRequest) -> Result<Page<AuditRecord>, StoreError> {
        let matches = query.select(self.records.read()?.iter());
        Ok(page.apply(matches))
    }

    async fn export_rows(&self, query: &AuditQuery, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let mut matches = query.select(self.records.read()?.iter());
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use gloria_audit::AuditEntry;

    #[tokio::test]
    async fn query_pages_newest_first() {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(AuditEntry::new(None, "role.created", "role", i, now + Duration::seconds(i)).into_record())
                .await
                .unwrap();
        }

        let page = store.query(&AuditQuery::default(), PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].entity_id, "4");

        let last = store.query(&AuditQuery::default(), PageRequest::new(3, 2)).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].entity_id, "0");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryAuditStore::new();
        let record = AuditEntry::new(None, "x.y", "x", 1, Utc::now()).into_record();
        store.append(record.clone()).await.unwrap();
        assert!(store.append(record).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn export_respects_limit() {
        let store = InMemoryAuditStore::new();
        for i in 0..3 {
            store
                .append(AuditEntry::new(None, "x.y", "x", i, Utc::now()).into_record())
                .await
                .unwrap();
        }
        assert_eq!(store.export_rows(&AuditQuery::default(), 2).await.unwrap().len(), 2);
    }
}
