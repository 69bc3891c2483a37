//! Workflow state machine
//!
//! [`WorkflowOrchestrator::run`] takes an account from `created` to
//! `pending_review` and stops. [`WorkflowOrchestrator::resume`] takes a
//! reviewed record from `pending_review` to `completed`. Both validate every
//! transition with [`WorkflowStatus::can_transition_to`] and log it.
//!
//! A resume that does not finish hands its record back to review; one whose
//! process died can be handed back with [`WorkflowOrchestrator::recover`].

mod components;

pub use components::PipelineComponents;

use crate::registry::AccountBinding;
use crate::retry::{retry_transient, RetryConfig};
use crate::stages::{unreferenced_items, Stage};
use crate::validation::{check_compliance, validate_data};
use crate::{Result, WorkflowError};
use checkpoint::{
    workflow_id, CalendarArtifact, RecordFilter, ReviewStore, StoreError, WorkflowRecord, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use integration::DateRange;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a run ended.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// Persisted and waiting for review
    PendingReview(WorkflowRecord),
    /// Stopped before the checkpoint; nothing was persisted
    Failed(WorkflowFailure),
}

impl WorkflowOutcome {
    pub fn is_pending_review(&self) -> bool {
        matches!(self, WorkflowOutcome::PendingReview(_))
    }

    pub fn record(&self) -> Option<&WorkflowRecord> {
        match self {
            WorkflowOutcome::PendingReview(record) => Some(record),
            WorkflowOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&WorkflowFailure> {
        match self {
            WorkflowOutcome::Failed(failure) => Some(failure),
            WorkflowOutcome::PendingReview(_) => None,
        }
    }

    pub fn into_result(self) -> Result<WorkflowRecord> {
        match self {
            WorkflowOutcome::PendingReview(record) => Ok(record),
            WorkflowOutcome::Failed(failure) => Err(failure.error),
        }
    }
}

/// A run that failed before reaching the checkpoint.
#[derive(Debug)]
pub struct WorkflowFailure {
    pub workflow_id: String,
    pub account_alias: String,
    pub range: DateRange,
    /// State the failure happened in
    pub state: WorkflowStatus,
    pub error: WorkflowError,
    pub advisories: Vec<String>,
    pub failed_at: DateTime<Utc>,
}

impl WorkflowFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// In-memory progress of one run.
struct RunState {
    workflow_id: String,
    account_alias: String,
    range: DateRange,
    status: WorkflowStatus,
    started_at: DateTime<Utc>,
    advisories: Vec<String>,
}

impl RunState {
    fn new(alias: &str, range: DateRange) -> Self {
        let started_at = Utc::now();
        Self {
            workflow_id: workflow_id(alias, range.start(), range.end(), started_at),
            account_alias: alias.to_string(),
            range,
            status: WorkflowStatus::Created,
            started_at,
            advisories: Vec::new(),
        }
    }

    /// Adopt the canonical alias once the account is resolved.
    fn bind(&mut self, alias: &str) {
        if alias != self.account_alias {
            self.account_alias = alias.to_string();
            self.workflow_id = workflow_id(alias, self.range.start(), self.range.end(), self.started_at);
        }
    }

    fn advance(&mut self, to: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition { from: self.status, to });
        }
        log_transition(&self.workflow_id, self.status, to);
        self.status = to;
        Ok(())
    }
}

fn log_transition(workflow_id: &str, from: WorkflowStatus, to: WorkflowStatus) {
    info!(workflow_id = workflow_id, from = %from, to = %to, "Workflow transition");
}

/// Drives workflows through the pipeline.
pub struct WorkflowOrchestrator {
    components: PipelineComponents,
    retry: RetryConfig,
    require_approval: bool,
}

impl WorkflowOrchestrator {
    pub fn new(components: PipelineComponents) -> Self {
        Self {
            components,
            retry: RetryConfig::default(),
            require_approval: true,
        }
    }

    /// Backoff for transient fetch timeouts
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// When set, only approved records can be resumed.
    pub fn with_require_approval(mut self, require_approval: bool) -> Self {
        self.require_approval = require_approval;
        self
    }

    pub fn components(&self) -> &PipelineComponents {
        &self.components
    }

    /// Run an account's calendar up to the review checkpoint.
    pub async fn run(&self, alias: &str, range: DateRange) -> WorkflowOutcome {
        let mut state = RunState::new(alias, range);
        info!(workflow_id = %state.workflow_id, account = alias, range = %range, "Starting workflow");

        match self.execute(&mut state).await {
            Ok(record) => WorkflowOutcome::PendingReview(record),
            Err(error) => {
                let failed_in = state.status;
                error!(
                    workflow_id = %state.workflow_id,
                    state = %failed_in,
                    kind = error.kind(),
                    error = %error,
                    "Workflow failed"
                );
                if failed_in.can_transition_to(WorkflowStatus::Failed) {
                    log_transition(&state.workflow_id, failed_in, WorkflowStatus::Failed);
                }
                WorkflowOutcome::Failed(WorkflowFailure {
                    workflow_id: state.workflow_id,
                    account_alias: state.account_alias,
                    range,
                    state: failed_in,
                    error,
                    advisories: state.advisories,
                    failed_at: Utc::now(),
                })
            }
        }
    }

    async fn execute(&self, state: &mut RunState) -> Result<WorkflowRecord> {
        let range = state.range;
        self.components.stages.ready(Stage::Planning).await?;
        let binding = self
            .components
            .registry
            .get_account_binding(&state.account_alias)?;
        state.bind(&binding.alias);

        state.advance(WorkflowStatus::Fetching)?;
        let target = binding.target();
        let integration = &self.components.integration;
        let target_ref = &target;
        let aggregate = retry_transient(&self.retry, "fetch_all", move || {
            integration.fetch_all(target_ref, range)
        })
        .await?;

        state.advance(WorkflowStatus::Validating)?;
        let data_advisories = validate_data(&aggregate).into_result(&binding.alias, range)?;
        state.advisories.extend(data_advisories);

        state.advance(WorkflowStatus::Stage1)?;
        let brand = self.components.retrieval.gather(&binding.alias).await;
        state.advisories.extend(brand.advisories.iter().cloned());
        let plan = self
            .components
            .stages
            .plan(&binding, range, &aggregate, &brand)
            .await?;

        state.advance(WorkflowStatus::Stage2)?;
        let artifact = self.components.stages.structure(&binding, range, &plan).await?;
        state.advisories.extend(out_of_range_advisories(&artifact, range));
        for warning in artifact.schema_warnings() {
            warn!(workflow_id = %state.workflow_id, warning = %warning, "Calendar item field problem");
            state.advisories.push(warning);
        }

        state.advance(WorkflowStatus::ComplianceCheck)?;
        let report = check_compliance(&binding.alias, &artifact, &binding.minimum_requirements)
            .into_result(&binding.alias)?;
        state
            .advisories
            .extend(report.defects.iter().map(|defect| format!("unusable category on {}", defect)));

        let record = WorkflowRecord::pending_review(
            &binding.alias,
            range.start(),
            range.end(),
            plan,
            artifact,
        )
        .with_created_at(state.started_at)
        .with_advisories(state.advisories.clone());
        self.components.store.put(record.clone()).await?;
        state.advance(WorkflowStatus::PendingReview)?;

        info!(
            workflow_id = %record.workflow_id,
            items = record.stage2_output.len(),
            advisories = record.advisories.len(),
            "Workflow suspended for review"
        );
        Ok(record)
    }

    /// Resume a reviewed workflow from its stored artifact.
    ///
    /// The record is claimed by moving it to `resuming`. If the resume stops
    /// before settling the record (an error while saving, or the future being
    /// dropped), the claim is released back to `pending_review`.
    pub async fn resume(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        self.components.stages.ready(Stage::Briefs).await?;

        let stored = self.components.store.get(workflow_id).await?;
        if stored.status != WorkflowStatus::PendingReview {
            return Err(conflict(workflow_id, format!("workflow is {}, not pending_review", stored.status)));
        }
        if self.require_approval && !stored.review.is_approved() {
            return Err(conflict(workflow_id, "workflow has not been approved"));
        }
        let binding = self
            .components
            .registry
            .get_account_binding(&stored.account_alias)?;
        let range = DateRange::new(stored.start_date, stored.end_date)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let record = self
            .components
            .store
            .transition(workflow_id, WorkflowStatus::PendingReview, WorkflowStatus::Resuming)
            .await?;
        log_transition(workflow_id, WorkflowStatus::PendingReview, WorkflowStatus::Resuming);
        let claim = ResumeClaim::new(self.components.store.clone(), workflow_id);

        let result = self.resume_claimed(workflow_id, record, &binding, range).await;
        match &result {
            Ok(_) => claim.disarm(),
            Err(error) => claim.release(&error.to_string()).await,
        }
        result
    }

    async fn resume_claimed(
        &self,
        workflow_id: &str,
        mut record: WorkflowRecord,
        binding: &AccountBinding,
        range: DateRange,
    ) -> Result<WorkflowRecord> {
        let report = check_compliance(&binding.alias, &record.stage2_output, &binding.minimum_requirements);
        if let Err(violation) = report.into_result(&binding.alias) {
            warn!(workflow_id = workflow_id, error = %violation, "Reviewed artifact fails compliance");
            record.apply_rejection(violation.to_string())?;
            self.components.store.save(&record).await?;
            log_transition(workflow_id, WorkflowStatus::Resuming, WorkflowStatus::PendingReview);
            return Err(violation.into());
        }

        record.apply_transition(WorkflowStatus::Resuming, WorkflowStatus::Stage3)?;
        self.components.store.save(&record).await?;
        log_transition(workflow_id, WorkflowStatus::Resuming, WorkflowStatus::Stage3);

        match self
            .components
            .stages
            .briefs(binding, range, &record.stage2_output)
            .await
        {
            Ok(briefs) => {
                for label in unreferenced_items(&record.stage2_output, &briefs) {
                    warn!(workflow_id = workflow_id, item = %label, "Brief does not reference item");
                    record
                        .advisories
                        .push(format!("briefs do not reference item '{}'", label));
                }
                record.stage3_output = Some(briefs);
                record.apply_transition(WorkflowStatus::Stage3, WorkflowStatus::Completed)?;
                self.components.store.save(&record).await?;
                log_transition(workflow_id, WorkflowStatus::Stage3, WorkflowStatus::Completed);
                info!(workflow_id = workflow_id, "Workflow completed");
                Ok(record)
            }
            Err(error) => {
                error!(workflow_id = workflow_id, kind = error.kind(), error = %error, "Brief stage failed");
                record.apply_failure(error.kind(), error.to_string())?;
                self.components.store.save(&record).await?;
                log_transition(workflow_id, WorkflowStatus::Stage3, WorkflowStatus::Failed);
                Err(error)
            }
        }
    }

    /// Return a workflow left in `resuming` or `stage3` by a process that
    /// died mid-resume. Records updated within `stale_after` are treated as
    /// still running and rejected with a conflict.
    pub async fn recover(&self, workflow_id: &str, stale_after: chrono::Duration) -> Result<WorkflowRecord> {
        let record = self
            .components
            .store
            .release(workflow_id, RECOVERED_REASON, Some(Utc::now() - stale_after))
            .await?;
        warn!(workflow_id = workflow_id, approved = record.review.is_approved(), "Recovered unfinished resume");
        Ok(record)
    }

    /// [`recover`](Self::recover) every stale claimed record.
    pub async fn recover_stale(&self, stale_after: chrono::Duration) -> Result<Vec<WorkflowRecord>> {
        let mut recovered = Vec::new();
        for status in [WorkflowStatus::Resuming, WorkflowStatus::Stage3] {
            let filter = RecordFilter {
                status: Some(status),
                ..Default::default()
            };
            for record in self.components.store.list(&filter).await? {
                match self.recover(&record.workflow_id, stale_after).await {
                    Ok(record) => recovered.push(record),
                    Err(WorkflowError::Store(e)) if e.is_conflict() => {
                        debug!(workflow_id = %record.workflow_id, reason = %e, "Skipping active resume");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(recovered)
    }
}

const INTERRUPTED_REASON: &str = "resume was interrupted before finishing";
const RECOVERED_REASON: &str = "resume did not finish and was recovered";

/// A record held in `resuming`/`stage3` by one resume call.
///
/// Dropped while armed (the resume future was cancelled), it releases the
/// record in a background task.
struct ResumeClaim {
    store: Arc<dyn ReviewStore>,
    workflow_id: String,
    armed: bool,
}

impl ResumeClaim {
    fn new(store: Arc<dyn ReviewStore>, workflow_id: &str) -> Self {
        Self {
            store,
            workflow_id: workflow_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn release(mut self, reason: &str) {
        self.armed = false;
        release_claim(self.store.as_ref(), &self.workflow_id, reason).await;
    }
}

impl Drop for ResumeClaim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let workflow_id = std::mem::take(&mut self.workflow_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_claim(store.as_ref(), &workflow_id, INTERRUPTED_REASON).await;
                });
            }
            Err(_) => {
                error!(workflow_id = %workflow_id, "Resume dropped outside a runtime; record needs recovery");
            }
        }
    }
}

/// Release a claim unless the resume already settled the record.
async fn release_claim(store: &dyn ReviewStore, workflow_id: &str, reason: &str) {
    match store.release(workflow_id, reason, None).await {
        Ok(record) => {
            warn!(workflow_id = workflow_id, status = %record.status, reason = reason, "Released unfinished resume");
        }
        Err(e) if e.is_conflict() || matches!(e, StoreError::NotFound(_)) => {
            debug!(workflow_id = workflow_id, "Resume already settled");
        }
        Err(e) => {
            error!(workflow_id = workflow_id, error = %e, "Could not release unfinished resume; record needs recovery");
        }
    }
}

fn conflict(workflow_id: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::Store(StoreError::Conflict {
        id: workflow_id.to_string(),
        reason: reason.into(),
    })
}

fn out_of_range_advisories(artifact: &CalendarArtifact, range: DateRange) -> Vec<String> {
    artifact
        .items_outside(range.start(), range.end())
        .into_iter()
        .map(|item| {
            format!(
                "item '{}' is scheduled on {}, outside {}",
                item.label().unwrap_or("unnamed"),
                item.scheduled_date,
                range
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint::{CategoryTag, GeneratedItem, ItemCategory};
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_run_state_rejects_skipped_states() {
        let mut state = RunState::new("acme", range());
        state.advance(WorkflowStatus::Fetching).unwrap();
        let err = state.advance(WorkflowStatus::Stage1).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: WorkflowStatus::Fetching,
                to: WorkflowStatus::Stage1
            }
        ));
        assert_eq!(state.status, WorkflowStatus::Fetching);
    }

    #[test]
    fn test_bind_rederives_id() {
        let mut state = RunState::new("Acme Outdoor", range());
        state.bind("acme");
        assert!(state.workflow_id.starts_with("acme-2026-01-01-2026-01-31-"));
    }

    #[test]
    fn test_out_of_range_items_become_advisories() {
        let artifact = CalendarArtifact::new(vec![
            GeneratedItem::new(
                CategoryTag::Known(ItemCategory::Email),
                NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            )
            .with_field("name", "Valentine Teaser"),
            GeneratedItem::new(
                CategoryTag::Known(ItemCategory::Email),
                NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            ),
        ]);
        let advisories = out_of_range_advisories(&artifact, range());
        assert_eq!(advisories.len(), 1);
        assert!(advisories[0].contains("Valentine Teaser"));
        assert!(advisories[0].contains("2026-02-02"));
    }
}
