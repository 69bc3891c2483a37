//! File-backed review store
//!
//! Each workflow record is one pretty-printed JSON document named
//! `<encoded workflow id>.json` inside the store directory. Writes go to a
//! temporary file in the same directory, are fsynced, and then atomically
//! renamed over the target, so a crash never leaves a half-written record.
//!
//! All mutations are serialized by a single async mutex. Reads do not take
//! the lock; they only ever observe a complete document.

use crate::artifact::CalendarArtifact;
use crate::error::{Result, StoreError};
use crate::record::{RecordFilter, WorkflowRecord, WorkflowStatus};
use crate::traits::ReviewStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";

/// Review store that keeps one JSON document per workflow in a directory.
#[derive(Debug)]
pub struct FileReviewStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileReviewStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file review store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_id(workflow_id), RECORD_EXTENSION))
    }

    async fn read_record(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        match tokio::fs::read(self.path_for(workflow_id)).await {
            Ok(bytes) => {
                let record: WorkflowRecord = serde_json::from_slice(&bytes)?;
                if record.workflow_id != workflow_id {
                    warn!(
                        requested = workflow_id,
                        found = %record.workflow_id,
                        "Record file holds a different workflow"
                    );
                    return Ok(None);
                }
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &WorkflowRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let dir = self.dir.clone();
        let target = self.path_for(&record.workflow_id);

        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    async fn read_all(&self) -> Result<Vec<WorkflowRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<WorkflowRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable workflow record"),
            }
        }
        Ok(records)
    }

    async fn mutate<F>(&self, workflow_id: &str, f: F) -> Result<WorkflowRecord>
    where
        F: FnOnce(&mut WorkflowRecord) -> Result<bool> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read_record(workflow_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        if f(&mut record)? {
            self.write_record(&record).await?;
        }
        Ok(record)
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Map a workflow id onto a safe file stem.
///
/// Alphanumerics, `-` and `.` are kept; every other byte becomes `_xx`
/// (lowercase hex), so distinct ids never share a file.
fn encode_id(workflow_id: &str) -> String {
    let mut stem = String::with_capacity(workflow_id.len());
    for byte in workflow_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' => stem.push(byte as char),
            _ => stem.push_str(&format!("_{:02x}", byte)),
        }
    }
    stem
}

#[async_trait]
impl ReviewStore for FileReviewStore {
    async fn put(&self, record: WorkflowRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_record(&record.workflow_id).await?.is_some() {
            return Err(StoreError::conflict(&record.workflow_id, "record already exists"));
        }
        self.write_record(&record).await?;
        debug!(workflow_id = %record.workflow_id, status = %record.status, "Persisted workflow record");
        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        self.read_record(workflow_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))
    }

    async fn replace(
        &self,
        workflow_id: &str,
        artifact: CalendarArtifact,
        editor: Option<&str>,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| {
            record.apply_replace(artifact, editor).map(|_| true)
        })
        .await
    }

    async fn approve(&self, workflow_id: &str, reviewer: &str) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| record.apply_approve(reviewer))
            .await
    }

    async fn transition(
        &self,
        workflow_id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| {
            record.apply_transition(from, to).map(|_| true)
        })
        .await
    }

    async fn release(
        &self,
        workflow_id: &str,
        reason: &str,
        idle_since: Option<DateTime<Utc>>,
    ) -> Result<WorkflowRecord> {
        self.mutate(workflow_id, |record| {
            record.apply_release(reason, idle_since).map(|_| true)
        })
        .await
    }

    async fn save(&self, record: &WorkflowRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_record(&record.workflow_id).await?.is_none() {
            return Err(StoreError::NotFound(record.workflow_id.clone()));
        }
        self.write_record(record).await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<WorkflowRecord>> {
        let records = self.read_all().await?;
        Ok(filter.apply(records.iter()))
    }

    async fn delete(&self, workflow_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(workflow_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_older_than(&self, age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for record in self.read_all().await? {
            if record.created_at < cutoff {
                tokio::fs::remove_file(self.path_for(&record.workflow_id)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
