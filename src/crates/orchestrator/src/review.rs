//! Checkpoint API surface
//!
//! What an external reviewer (or a front end acting for one) can do with a
//! suspended workflow: read it, replace its artifact, approve it, resume it,
//! and list what is waiting. Every error carries a stable boundary code:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `not_found` | no such workflow |
//! | `conflict` | not in a state that allows the operation |
//! | `invalid_artifact` | replacement does not match the calendar schema |
//! | `compliance_failed` | reviewed artifact is below the account minimums |
//!
//! Failures during brief generation keep the workflow error's own kind.

use crate::validation::ComplianceViolationError;
use crate::workflow::WorkflowOrchestrator;
use crate::WorkflowError;
use checkpoint::{ArtifactError, CalendarArtifact, RecordFilter, ReviewStore, StoreError, WorkflowRecord};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(#[from] ArtifactError),

    #[error(transparent)]
    ComplianceFailed(ComplianceViolationError),

    #[error(transparent)]
    Workflow(WorkflowError),
}

impl ReviewError {
    pub fn code(&self) -> &'static str {
        match self {
            ReviewError::NotFound(_) => "not_found",
            ReviewError::Conflict(_) => "conflict",
            ReviewError::InvalidArtifact(_) => "invalid_artifact",
            ReviewError::ComplianceFailed(_) => "compliance_failed",
            ReviewError::Workflow(error) => error.kind(),
        }
    }
}

impl From<StoreError> for ReviewError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ReviewError::NotFound(id),
            StoreError::Conflict { id, reason } => ReviewError::Conflict(format!("{}: {}", id, reason)),
            other => ReviewError::Workflow(WorkflowError::Store(other)),
        }
    }
}

impl From<WorkflowError> for ReviewError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::Store(store) => store.into(),
            WorkflowError::Artifact(artifact) => ReviewError::InvalidArtifact(artifact),
            WorkflowError::ComplianceViolation(violation) => ReviewError::ComplianceFailed(violation),
            other => ReviewError::Workflow(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Review operations over a store, resuming through an orchestrator.
pub struct ReviewService {
    store: Arc<dyn ReviewStore>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ReviewService {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self {
            store: orchestrator.components().store.clone(),
            orchestrator,
        }
    }

    pub async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        Ok(self.store.get(workflow_id).await?)
    }

    /// The stored stage-2 artifact.
    pub async fn artifact(&self, workflow_id: &str) -> Result<CalendarArtifact> {
        Ok(self.store.get(workflow_id).await?.stage2_output)
    }

    /// Replace the whole artifact with an edited document.
    ///
    /// Accepts the same shapes the structuring stage does: a bare item array
    /// or an object holding `items`, `campaigns`, `events` or `calendar`.
    pub async fn replace_artifact(
        &self,
        workflow_id: &str,
        document: Value,
        editor: Option<&str>,
    ) -> Result<WorkflowRecord> {
        let artifact = CalendarArtifact::from_value(document)?;
        let items = artifact.len();
        let record = self.store.replace(workflow_id, artifact, editor).await?;
        info!(workflow_id = workflow_id, items = items, editor = editor.unwrap_or("unknown"), "Artifact replaced");
        Ok(record)
    }

    /// Approve; approving twice keeps the first approval.
    pub async fn approve(&self, workflow_id: &str, reviewer: &str) -> Result<WorkflowRecord> {
        let record = self.store.approve(workflow_id, reviewer).await?;
        info!(workflow_id = workflow_id, reviewer = reviewer, "Workflow approved");
        Ok(record)
    }

    pub async fn resume(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        Ok(self.orchestrator.resume(workflow_id).await?)
    }

    /// Hand a workflow stuck mid-resume back to review. Records touched
    /// within `stale_after` are refused as still running.
    pub async fn recover(&self, workflow_id: &str, stale_after: chrono::Duration) -> Result<WorkflowRecord> {
        Ok(self.orchestrator.recover(workflow_id, stale_after).await?)
    }

    /// Recover every workflow stuck mid-resume for longer than `stale_after`.
    pub async fn recover_stale(&self, stale_after: chrono::Duration) -> Result<Vec<WorkflowRecord>> {
        Ok(self.orchestrator.recover_stale(stale_after).await?)
    }

    /// Workflows waiting for review, newest first.
    pub async fn list_pending(&self, account: Option<&str>) -> Result<Vec<WorkflowRecord>> {
        let filter = match account {
            Some(alias) => RecordFilter::pending().with_account(alias),
            None => RecordFilter::pending(),
        };
        Ok(self.store.list(&filter).await?)
    }

    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<WorkflowRecord>> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn delete(&self, workflow_id: &str) -> Result<()> {
        if !self.store.delete(workflow_id).await? {
            return Err(ReviewError::NotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    /// Remove records older than `age`; returns how many went.
    pub async fn purge_older_than(&self, age: chrono::Duration) -> Result<usize> {
        Ok(self.store.purge_older_than(age).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Stage;
    use checkpoint::WorkflowStatus;
    use integration::IntegrationError;

    #[test]
    fn test_codes() {
        let not_found: ReviewError = StoreError::NotFound("wf".to_string()).into();
        assert_eq!(not_found.code(), "not_found");

        let conflict: ReviewError = WorkflowError::Store(StoreError::Conflict {
            id: "wf".to_string(),
            reason: "already resumed".to_string(),
        })
        .into();
        assert_eq!(conflict.code(), "conflict");

        let invalid: ReviewError = ArtifactError::UnrecognizedShape("string".to_string()).into();
        assert_eq!(invalid.code(), "invalid_artifact");

        let compliance: ReviewError = WorkflowError::ComplianceViolation(ComplianceViolationError {
            account: "acme".to_string(),
            deficiencies: Vec::new(),
            defects: Vec::new(),
        })
        .into();
        assert_eq!(compliance.code(), "compliance_failed");
    }

    #[test]
    fn test_other_workflow_errors_keep_their_kind() {
        let generation: ReviewError = WorkflowError::StageOutput {
            stage: Stage::Briefs,
            reason: "empty output".to_string(),
        }
        .into();
        assert_eq!(generation.code(), "generation_output");

        let transition: ReviewError = WorkflowError::InvalidTransition {
            from: WorkflowStatus::Completed,
            to: WorkflowStatus::Resuming,
        }
        .into();
        assert_eq!(transition.code(), "state");

        let integration: ReviewError = WorkflowError::Integration(IntegrationError::Credential("x".into())).into();
        assert_eq!(integration.code(), "integration");
    }
}
