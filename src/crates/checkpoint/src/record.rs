//! Workflow record persisted at the review checkpoint.
//!
//! A [`WorkflowRecord`] is created by the orchestrator once the structured
//! artifact has passed compliance and is handed to a [`ReviewStore`] in the
//! `pending_review` state. From then on the stored copy is authoritative: the
//! brief stage reads the (possibly edited) artifact back from the store.
//!
//! ## Status lifecycle
//!
//! ```text
//! created → fetching → validating → stage1 → stage2 → compliance_check
//!         → pending_review → resuming → stage3 → completed
//!
//! any non-terminal state → failed
//! resuming → pending_review   (compliance re-check failed, approval revoked)
//! resuming | stage3 → pending_review   (unfinished resume released)
//! ```
//!
//! [`ReviewStore`]: crate::ReviewStore

use crate::artifact::CalendarArtifact;
use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Fetching,
    Validating,
    Stage1,
    Stage2,
    ComplianceCheck,
    PendingReview,
    Resuming,
    Stage3,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Fetching => "fetching",
            WorkflowStatus::Validating => "validating",
            WorkflowStatus::Stage1 => "stage1",
            WorkflowStatus::Stage2 => "stage2",
            WorkflowStatus::ComplianceCheck => "compliance_check",
            WorkflowStatus::PendingReview => "pending_review",
            WorkflowStatus::Resuming => "resuming",
            WorkflowStatus::Stage3 => "stage3",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Held by a resume that has not finished yet.
    pub fn is_claimed(&self) -> bool {
        matches!(self, WorkflowStatus::Resuming | WorkflowStatus::Stage3)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Created, Fetching)
                | (Fetching, Validating)
                | (Validating, Stage1)
                | (Stage1, Stage2)
                | (Stage2, ComplianceCheck)
                | (ComplianceCheck, PendingReview)
                | (PendingReview, Resuming)
                | (Resuming, PendingReview)
                | (Resuming, Stage3)
                | (Stage3, PendingReview)
                | (Stage3, Completed)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| StoreError::Invalid(format!("unknown workflow status '{}'", s)))
    }
}

/// One whole-artifact replacement made during review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    pub edited_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    pub item_count: usize,
}

/// Review-related metadata attached to a record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReviewMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub edit_history: Vec<EditEvent>,
    /// Compliance failure reported by the most recent resume attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resume_error: Option<String>,
}

impl ReviewMetadata {
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn has_external_edits(&self) -> bool {
        !self.edit_history.is_empty()
    }

    pub fn revoke_approval(&mut self) {
        self.reviewer_id = None;
        self.approved_at = None;
    }
}

/// Terminal failure details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// State the workflow was in when it failed
    pub state: WorkflowStatus,
    /// Stable error classification
    pub kind: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Durable workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub account_alias: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: WorkflowStatus,
    pub stage1_output: String,
    pub stage2_output: CalendarArtifact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage3_output: Option<String>,
    #[serde(default)]
    pub review: ReviewMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub advisories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a record in `pending_review` ready to be handed to a store.
    pub fn pending_review(
        account_alias: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        stage1_output: impl Into<String>,
        stage2_output: CalendarArtifact,
    ) -> Self {
        let account_alias = account_alias.into();
        let now = Utc::now();
        Self {
            workflow_id: workflow_id(&account_alias, start_date, end_date, now),
            account_alias,
            start_date,
            end_date,
            status: WorkflowStatus::PendingReview,
            stage1_output: stage1_output.into(),
            stage2_output,
            stage3_output: None,
            review: ReviewMetadata::default(),
            failure: None,
            advisories: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_advisories(mut self, advisories: Vec<String>) -> Self {
        self.advisories = advisories;
        self
    }

    /// Backdate the record to when its run started; the id follows.
    pub fn with_created_at(mut self, created: DateTime<Utc>) -> Self {
        self.workflow_id = workflow_id(&self.account_alias, self.start_date, self.end_date, created);
        self.created_at = created;
        self
    }

    /// Replace the artifact and record the edit.
    pub fn apply_replace(&mut self, artifact: CalendarArtifact, editor: Option<&str>) -> Result<()> {
        if self.status != WorkflowStatus::PendingReview {
            return Err(StoreError::conflict(
                &self.workflow_id,
                format!("cannot edit artifact in state {}", self.status),
            ));
        }
        if self.review.is_approved() {
            return Err(StoreError::conflict(
                &self.workflow_id,
                "artifact is already approved",
            ));
        }

        let now = Utc::now();
        self.review.edit_history.push(EditEvent {
            edited_at: now,
            editor: editor.map(str::to_string),
            item_count: artifact.len(),
        });
        self.review.last_resume_error = None;
        self.stage2_output = artifact;
        self.updated_at = now;
        Ok(())
    }

    /// Approve the record. Returns `false` when it was already approved.
    pub fn apply_approve(&mut self, reviewer: &str) -> Result<bool> {
        if self.review.is_approved() {
            return Ok(false);
        }
        if self.status != WorkflowStatus::PendingReview {
            return Err(StoreError::conflict(
                &self.workflow_id,
                format!("cannot approve in state {}", self.status),
            ));
        }

        let now = Utc::now();
        self.review.reviewer_id = Some(reviewer.to_string());
        self.review.approved_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// Compare-and-set the status.
    pub fn apply_transition(&mut self, from: WorkflowStatus, to: WorkflowStatus) -> Result<()> {
        if self.status != from {
            return Err(StoreError::conflict(
                &self.workflow_id,
                format!("expected state {}, found {}", from, self.status),
            ));
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::Invalid(format!(
                "illegal transition {} -> {}",
                from, to
            )));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Send a resumed record back to review after its artifact failed the
    /// compliance recheck. The approval is revoked so the artifact can be
    /// edited again.
    pub fn apply_rejection(&mut self, reason: impl Into<String>) -> Result<()> {
        self.apply_transition(WorkflowStatus::Resuming, WorkflowStatus::PendingReview)?;
        self.review.revoke_approval();
        self.review.last_resume_error = Some(reason.into());
        Ok(())
    }

    /// Hand a record held by an unfinished resume back to review, keeping
    /// its approval.
    ///
    /// With `idle_since` set, records touched after that instant are left
    /// alone: their resume may still be running.
    pub fn apply_release(
        &mut self,
        reason: impl Into<String>,
        idle_since: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if !self.status.is_claimed() {
            return Err(StoreError::conflict(
                &self.workflow_id,
                format!("workflow is {}, no resume to release", self.status),
            ));
        }
        if let Some(cutoff) = idle_since {
            if self.updated_at > cutoff {
                return Err(StoreError::conflict(
                    &self.workflow_id,
                    format!("resume still active, last update {}", self.updated_at),
                ));
            }
        }
        let from = self.status;
        self.apply_transition(from, WorkflowStatus::PendingReview)?;
        self.review.last_resume_error = Some(reason.into());
        Ok(())
    }

    /// Move to `failed`, recording the state the failure happened in.
    pub fn apply_failure(&mut self, kind: impl Into<String>, message: impl Into<String>) -> Result<()> {
        let state = self.status;
        self.apply_transition(state, WorkflowStatus::Failed)?;
        self.failure = Some(FailureRecord {
            state,
            kind: kind.into(),
            message: message.into(),
            failed_at: self.updated_at,
        });
        Ok(())
    }
}

/// Derive a workflow id from alias, range and creation time.
pub fn workflow_id(alias: &str, start: NaiveDate, end: NaiveDate, created: DateTime<Utc>) -> String {
    format!("{}-{}-{}-{}", alias, start, end, created.format("%Y%m%dT%H%M%S%3f"))
}

/// Query filter for [`ReviewStore::list`](crate::ReviewStore::list).
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<WorkflowStatus>,
    pub account_alias: Option<String>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(WorkflowStatus::PendingReview),
            ..Default::default()
        }
    }

    pub fn with_account(mut self, alias: impl Into<String>) -> Self {
        self.account_alias = Some(alias.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &WorkflowRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self
                .account_alias
                .as_deref()
                .map_or(true, |alias| record.account_alias == alias)
    }

    /// Filter, sort newest first, and truncate.
    pub(crate) fn apply<'a>(&self, records: impl Iterator<Item = &'a WorkflowRecord>) -> Vec<WorkflowRecord> {
        let mut matched: Vec<WorkflowRecord> =
            records.filter(|record| self.matches(record)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}
