//! Gates that stop a workflow before it wastes generation or persists a
//! non-conforming artifact.
//!
//! - [`data`] runs on the fetched account data, before any generation
//! - [`compliance`] runs on the structured artifact, before the checkpoint
//!   and again on resume

pub mod compliance;
pub mod data;

pub use compliance::{check_compliance, ComplianceReport, ComplianceViolationError, Deficiency};
pub use data::{validate_data, DataReport, DataValidationError, DataViolation};
