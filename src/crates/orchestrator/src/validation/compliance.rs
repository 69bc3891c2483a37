//! Per-account minimum output counts

use checkpoint::{CalendarArtifact, ItemCategory};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A category with fewer items than the account requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deficiency {
    pub category: ItemCategory,
    pub observed: usize,
    pub required: u32,
}

impl fmt::Display for Deficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} observed vs {} required",
            self.category, self.observed, self.required
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceReport {
    /// Items per recognized category
    pub counts: BTreeMap<ItemCategory, usize>,
    pub deficiencies: Vec<Deficiency>,
    /// Items whose category could not be recognized
    pub defects: Vec<String>,
}

impl ComplianceReport {
    pub fn is_compliant(&self) -> bool {
        self.deficiencies.is_empty()
    }

    pub fn into_result(self, account: impl Into<String>) -> Result<Self, ComplianceViolationError> {
        if self.is_compliant() {
            return Ok(self);
        }
        Err(ComplianceViolationError {
            account: account.into(),
            deficiencies: self.deficiencies,
            defects: self.defects,
        })
    }
}

/// The calendar does not meet the account's minimums.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Calendar for '{account}' is below its minimums: {}", join(.deficiencies))]
pub struct ComplianceViolationError {
    pub account: String,
    pub deficiencies: Vec<Deficiency>,
    pub defects: Vec<String>,
}

fn join(deficiencies: &[Deficiency]) -> String {
    deficiencies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Count items per category and compare them with the minimums.
///
/// Items with an unrecognized or missing category count toward nothing and
/// are listed as defects.
pub fn check_compliance(
    account: &str,
    artifact: &CalendarArtifact,
    minimums: &BTreeMap<ItemCategory, u32>,
) -> ComplianceReport {
    let counts = artifact.count_by_category();

    let deficiencies = minimums
        .iter()
        .filter_map(|(category, required)| {
            let observed = counts.get(category).copied().unwrap_or(0);
            (observed < *required as usize).then_some(Deficiency {
                category: *category,
                observed,
                required: *required,
            })
        })
        .collect();

    let defects: Vec<String> = artifact
        .category_defects()
        .into_iter()
        .map(|(index, tag)| {
            let label = artifact.items[index].label().unwrap_or("unnamed");
            format!("item {} ({}): category {}", index, label, tag)
        })
        .collect();
    for defect in &defects {
        warn!(account = account, defect = %defect, "Item with unusable category");
    }

    ComplianceReport {
        counts,
        deficiencies,
        defects,
    }
}
