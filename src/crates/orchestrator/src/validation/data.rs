//! Structural validation of fetched account data

use integration::{AggregateResult, DataKind, DateRange, KindOutcome};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A critical data kind that cannot support generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataViolation {
    pub kind: DataKind,
    pub reason: String,
}

impl fmt::Display for DataViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Violations and advisories for one aggregate, in data-kind order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataReport {
    pub violations: Vec<DataViolation>,
    pub advisories: Vec<String>,
}

impl DataReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Advisories on success, every violation and advisory on failure.
    pub fn into_result(
        self,
        account: impl Into<String>,
        range: DateRange,
    ) -> Result<Vec<String>, DataValidationError> {
        if self.is_valid() {
            return Ok(self.advisories);
        }
        Err(DataValidationError {
            account: account.into(),
            range,
            violations: self.violations,
            advisories: self.advisories,
        })
    }
}

/// Fetched data cannot support generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Data validation failed for '{account}' ({range}): {}", join(.violations))]
pub struct DataValidationError {
    pub account: String,
    pub range: DateRange,
    pub violations: Vec<DataViolation>,
    pub advisories: Vec<String>,
}

impl DataValidationError {
    /// Critical kinds named by the violations.
    pub fn kinds(&self) -> Vec<DataKind> {
        self.violations.iter().map(|v| v.kind).collect()
    }
}

fn join(violations: &[DataViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check an aggregate against the data contract.
///
/// A critical kind that is absent, failed or empty is a violation. A
/// degraded non-critical kind, or an empty `flows`, is an advisory.
pub fn validate_data(aggregate: &AggregateResult) -> DataReport {
    let mut report = DataReport::default();

    for kind in DataKind::ALL {
        let outcome = aggregate.outcome(kind);
        if kind.is_critical() {
            let reason = match outcome {
                None => Some("no data was fetched".to_string()),
                Some(KindOutcome::Fatal { error, .. }) => Some(format!("fetch failed: {}", error)),
                Some(KindOutcome::Degraded { reason, .. }) => Some(format!("fetch degraded: {}", reason)),
                Some(KindOutcome::Ok(result)) if result.is_empty() => {
                    Some("returned no records".to_string())
                }
                Some(KindOutcome::Ok(_)) => None,
            };
            if let Some(reason) = reason {
                report.violations.push(DataViolation { kind, reason });
            }
            continue;
        }

        match outcome {
            Some(KindOutcome::Degraded { reason, .. }) | Some(KindOutcome::Fatal { error: reason, .. }) => {
                report
                    .advisories
                    .push(format!("{} unavailable, continuing without it: {}", kind, reason));
            }
            Some(KindOutcome::Ok(result)) if kind == DataKind::Flows && result.is_empty() => {
                report
                    .advisories
                    .push("flows returned no records; automated sends are not accounted for".to_string());
            }
            None => report.advisories.push(format!("{} was not fetched", kind)),
            Some(KindOutcome::Ok(_)) => {}
        }
    }

    for violation in &report.violations {
        warn!(account = %aggregate.account, kind = %violation.kind, reason = %violation.reason, "Data violation");
    }
    report
}
