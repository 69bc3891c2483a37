//! # orchestrator - Calendar Generation Workflow
//!
//! Drives one account's calendar from raw platform data to reviewed briefs:
//!
//! ```text
//! created → fetching → validating → stage1 → stage2 → compliance_check
//!         → pending_review ┄┄ (external edit / approve) ┄┄ resuming → stage3 → completed
//! ```
//!
//! - **fetching** pulls every [`DataKind`](integration::DataKind) through the
//!   shared [`FetchCache`](integration::FetchCache), retrying transient worker
//!   timeouts ([`retry`]).
//! - **validating** gates generation on the critical kinds
//!   ([`validation::data`]).
//! - **stage1/stage2** plan and structure the calendar ([`stages`]), with brand
//!   context from the [`retrieval`] adapter.
//! - **compliance_check** enforces the account's per-category minimums
//!   ([`validation::compliance`]) before anything is persisted.
//! - **pending_review** hands the record to a
//!   [`ReviewStore`](checkpoint::ReviewStore); the run ends there and holds no
//!   resources. [`WorkflowOrchestrator::resume`] picks the stored, possibly
//!   edited, artifact back up.
//!
//! Failures before the checkpoint come back as an in-memory
//! [`WorkflowOutcome::Failed`] and are never written to the store.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orchestrator::config::load_config;
//! use orchestrator::{PipelineComponents, WorkflowOrchestrator};
//!
//! let config = load_config("config/calendar-pipeline.toml")?;
//! let components = PipelineComponents::from_config(&config).await?;
//! let orchestrator = WorkflowOrchestrator::new(components)
//!     .with_retry(config.retry.clone())
//!     .with_require_approval(config.review.require_approval);
//!
//! let outcome = orchestrator.run("acme", range).await;
//! ```

pub mod config;
pub mod registry;
pub mod retrieval;
pub mod retry;
pub mod review;
pub mod stages;
pub mod validation;
pub mod workflow;

use checkpoint::{ArtifactError, StoreError, WorkflowStatus};
use integration::IntegrationError;
use llm::LlmError;
use thiserror::Error;

pub use config::{ConfigError, PipelineConfig};
pub use registry::{AccountBinding, AccountRegistry, RegistryError, StaticAccountRegistry};
pub use retrieval::{RetrievalAdapter, RetrievalService, RetrievedContext};
pub use retry::RetryConfig;
pub use review::{ReviewError, ReviewService};
pub use stages::{Stage, StageRunner};
pub use validation::{ComplianceViolationError, DataValidationError};
pub use workflow::{PipelineComponents, WorkflowFailure, WorkflowOrchestrator, WorkflowOutcome};

/// Errors that end a workflow run or a resume
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Account alias unknown or its binding is unusable
    #[error("Account configuration error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    #[error(transparent)]
    DataValidation(#[from] DataValidationError),

    #[error("{stage} generation failed: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    /// Generation succeeded but its output is unusable
    #[error("{stage} output rejected: {reason}")]
    StageOutput { stage: Stage, reason: String },

    #[error("Invalid calendar artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    ComplianceViolation(#[from] ComplianceViolationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WorkflowError {
    /// Stable classification for operators and boundary error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Registry(_) => "account_configuration",
            WorkflowError::Integration(_) => "integration",
            WorkflowError::DataValidation(_) => "data",
            WorkflowError::Generation { .. } => "generation",
            WorkflowError::StageOutput { .. } | WorkflowError::Artifact(_) => "generation_output",
            WorkflowError::ComplianceViolation(_) => "compliance",
            WorkflowError::Store(_) => "store",
            WorkflowError::InvalidTransition { .. } => "state",
            WorkflowError::Config(_) => "configuration",
        }
    }
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct_by_cause() {
        let data = WorkflowError::StageOutput {
            stage: Stage::Planning,
            reason: "too short".to_string(),
        };
        assert_eq!(data.kind(), "generation_output");

        let generation = WorkflowError::Generation {
            stage: Stage::Briefs,
            source: LlmError::RateLimitExceeded("slow down".to_string()),
        };
        assert_eq!(generation.kind(), "generation");
        assert!(generation.to_string().starts_with("stage3 (briefs) generation failed"));

        let registry = WorkflowError::from(RegistryError::UnknownAccount("ghost".to_string()));
        assert_eq!(registry.kind(), "account_configuration");
    }
}
