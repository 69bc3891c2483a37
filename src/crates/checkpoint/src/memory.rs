//! In-memory review store for development and testing
//!
//! Records live in an `Arc<RwLock<HashMap>>` keyed by workflow id. Each
//! mutation takes the write lock for its whole read-modify-write, which makes
//! every operation atomic per id. Data is lost when the process exits.

use crate::artifact::CalendarArtifact;
use crate::error::{Result, StoreError};
use crate::record::{RecordFilter, WorkflowRecord, WorkflowStatus};
use crate::traits::ReviewStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type RecordStorage = Arc<RwLock<HashMap<String, WorkflowRecord>>>;

/// In-memory review store
#[derive(Debug, Clone, Default)]
pub struct InMemoryReviewStore {
    storage: RecordStorage,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    /// Clear all records (useful for tests)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    async fn mutate<F>(&self, workflow_id: &str, f: F) -> Result<WorkflowRecord>
    where
        F: FnOnce(&mut WorkflowRecord) -> Result<()> + Send,
    {
        let mut storage = self.storage.write().await;
        let record = storage
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        // Apply on a copy so a rejected mutation leaves the stored record untouched.
        let mut updated = record.clone();
        f(&mut updated)?;
        *record = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl ReviewStore for InMemoryReviewStore {
    async fn put(&self, record: WorkflowRecord) -> Result<()> {
        let mut storage = self.storage.write().await;
        if storage.contains_key(&record.workflow_id) {
            return Err(StoreError::conflict(&record.workflow_id, "record already exists"));
        }
        debug!(workflow_id = %record.workflow_id, status = %record.status, "Stored workflow record");
        storage.insert(record.workflow_id.clone(), record);
        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        self.storage
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))
    }

    async fn replace(
        &self,
        workflow_id: &str,
        artifact: CalendarArtifact,
        editor: Option<&str>,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| record.apply_replace(artifact, editor))
            .await
    }

    async fn approve(&self, workflow_id: &str, reviewer: &str) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| record.apply_approve(reviewer).map(|_| ()))
            .await
    }

    async fn transition(
        &self,
        workflow_id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| record.apply_transition(from, to))
            .await
    }

    async fn release(
        &self,
        workflow_id: &str,
        reason: &str,
        idle_since: Option<DateTime<Utc>>,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| record.apply_release(reason, idle_since))
            .await
    }

    async fn save(&self, record: &WorkflowRecord) -> Result<()> {
        let mut storage = self.storage.write().await;
        match storage.get_mut(&record.workflow_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.workflow_id.clone())),
        }
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<WorkflowRecord>> {
        let storage = self.storage.read().await;
        Ok(filter.apply(storage.values()))
    }

    async fn delete(&self, workflow_id: &str) -> Result<bool> {
        Ok(self.storage.write().await.remove(workflow_id).is_some())
    }

    async fn purge_older_than(&self, age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let mut storage = self.storage.write().await;
        let before = storage.len();
        storage.retain(|_, record| record.created_at >= cutoff);
        Ok(before - storage.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{CategoryTag, GeneratedItem, ItemCategory};
    use chrono::NaiveDate;

    fn record(alias: &str) -> WorkflowRecord {
        let start = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let artifact = CalendarArtifact::new(vec![GeneratedItem::new(
            CategoryTag::Known(ItemCategory::Email),
            start,
        )]);
        WorkflowRecord::pending_review(alias, start, end, "plan", artifact)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryReviewStore::new();
        let record = record("acme");
        store.put(record.clone()).await.unwrap();

        assert_eq!(store.get(&record.workflow_id).await.unwrap(), record);
        assert!(store.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_put_duplicate_conflicts() {
        let store = InMemoryReviewStore::new();
        let record = record("acme");
        store.put(record.clone()).await.unwrap();
        assert!(store.put(record).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_record() {
        let store = InMemoryReviewStore::new();
        let record = record("acme");
        let id = record.workflow_id.clone();
        store.put(record).await.unwrap();

        let err = store
            .transition(&id, WorkflowStatus::Resuming, WorkflowStatus::Stage3)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(&id).await.unwrap().status, WorkflowStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_concurrent_claim_single_winner() {
        let store = Arc::new(InMemoryReviewStore::new());
        let record = record("acme");
        let id = record.workflow_id.clone();
        store.put(record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, WorkflowStatus::PendingReview, WorkflowStatus::Resuming)
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_list_and_purge() {
        let store = InMemoryReviewStore::new();
        let mut old = record("acme");
        old.created_at = Utc::now() - chrono::Duration::days(120);
        old.workflow_id = "acme-old".to_string();
        store.put(old).await.unwrap();
        store.put(record("acme")).await.unwrap();
        store.put(record("globex")).await.unwrap();

        let acme = store
            .list(&RecordFilter::pending().with_account("acme"))
            .await
            .unwrap();
        assert_eq!(acme.len(), 2);
        assert!(acme[0].created_at >= acme[1].created_at);

        let purged = store.purge_older_than(chrono::Duration::days(90)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.len().await, 2);
    }
}
