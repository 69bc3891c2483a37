//! Storage trait for review checkpoints
//!
//! [`ReviewStore`] is the seam between the workflow orchestrator and whatever
//! persists suspended workflows. Backends must make every operation atomic per
//! workflow id: two concurrent `transition` calls with the same `from` state
//! must not both succeed.
//!
//! The shared state rules live on [`WorkflowRecord`] (`apply_replace`,
//! `apply_approve`, `apply_transition`, `apply_release`), so a backend only has to provide
//! storage and per-id locking.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use checkpoint::{ReviewStore, WorkflowRecord, Result};
//!
//! struct SqlReviewStore { /* pool */ }
//!
//! #[async_trait]
//! impl ReviewStore for SqlReviewStore {
//!     async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord> {
//!         // SELECT document FROM workflows WHERE id = $1
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

use crate::artifact::CalendarArtifact;
use crate::error::Result;
use crate::record::{RecordFilter, WorkflowRecord, WorkflowStatus};
use async_trait::async_trait;

/// Durable store for workflow records suspended at the review checkpoint.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id already exists.
    async fn put(&self, record: WorkflowRecord) -> Result<()>;

    /// Fetch a record by id. Fails with `NotFound` if absent.
    async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord>;

    /// Replace the whole structured artifact (last write wins).
    ///
    /// Only allowed while the record is `pending_review` and not yet approved.
    async fn replace(
        &self,
        workflow_id: &str,
        artifact: CalendarArtifact,
        editor: Option<&str>,
    ) -> Result<WorkflowRecord>;

    /// Mark the record approved. Idempotent: approving an approved record
    /// returns it unchanged, keeping the first approval timestamp.
    async fn approve(&self, workflow_id: &str, reviewer: &str) -> Result<WorkflowRecord>;

    /// Compare-and-set the status from `from` to `to`.
    async fn transition(
        &self,
        workflow_id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<WorkflowRecord>;

    /// Return a record held by an unfinished resume (`resuming` or `stage3`)
    /// to `pending_review`, keeping its approval. See
    /// [`WorkflowRecord::apply_release`].
    async fn release(
        &self,
        workflow_id: &str,
        reason: &str,
        idle_since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<WorkflowRecord>;

    /// Overwrite an existing record. Fails with `NotFound` if absent.
    async fn save(&self, record: &WorkflowRecord) -> Result<()>;

    /// Records matching the filter, newest first.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<WorkflowRecord>>;

    /// Delete a record. Returns whether one was removed.
    async fn delete(&self, workflow_id: &str) -> Result<bool>;

    /// Delete records created longer than `age` ago. Returns the count removed.
    async fn purge_older_than(&self, age: chrono::Duration) -> Result<usize>;
}
