//! # checkpoint - Durable Review Checkpoints for the Calendar Pipeline
//!
//! **Trait-based storage for workflows suspended between structuring and
//! brief generation.** A workflow that has produced a compliant calendar
//! artifact is persisted here as a [`WorkflowRecord`] in `pending_review`,
//! where it waits for an external reviewer to read, edit, and approve it.
//! The orchestrator later re-reads the record and resumes from the stored,
//! possibly edited, artifact.
//!
//! ## Core Concepts
//!
//! ### 1. ReviewStore Trait
//!
//! [`ReviewStore`] is the persistence seam. Every operation is atomic per
//! workflow id:
//!
//! - **`put()`** - Insert a new record
//! - **`get()`** - Read a record by id
//! - **`replace()`** - Whole-artifact replacement during review
//! - **`approve()`** - Idempotent approval
//! - **`transition()`** - Compare-and-set on the workflow status
//! - **`save()`** - Overwrite an existing record
//! - **`list()` / `delete()` / `purge_older_than()`** - Housekeeping
//!
//! ### 2. Implementations
//!
//! - [`InMemoryReviewStore`] - `RwLock<HashMap>` backed, for tests and demos
//! - [`FileReviewStore`] - one JSON document per workflow, atomic rename on write
//!
//! ### 3. Artifact Model
//!
//! A [`CalendarArtifact`] holds [`GeneratedItem`]s. Each item carries a
//! [`CategoryTag`]; unknown tags are preserved so validation can report them
//! instead of silently dropping the item.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkpoint::{InMemoryReviewStore, ReviewStore, WorkflowRecord, WorkflowStatus};
//!
//! let store = InMemoryReviewStore::new();
//! let record = WorkflowRecord::pending_review("acme", start, end, plan, artifact);
//! let id = record.workflow_id.clone();
//! store.put(record).await?;
//!
//! store.approve(&id, "reviewer@acme").await?;
//! store.transition(&id, WorkflowStatus::PendingReview, WorkflowStatus::Resuming).await?;
//! ```

pub mod artifact;
pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod traits;

pub use artifact::{ArtifactError, CalendarArtifact, CategoryTag, GeneratedItem, ItemCategory};
pub use error::{Result, StoreError};
pub use file::FileReviewStore;
pub use memory::InMemoryReviewStore;
pub use record::{
    workflow_id, EditEvent, FailureRecord, RecordFilter, ReviewMetadata, WorkflowRecord,
    WorkflowStatus,
};
pub use traits::ReviewStore;
