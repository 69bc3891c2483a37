//! Data kinds, fetch keys, and fan-out results

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Category of external data fetched for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Segments,
    Campaigns,
    Flows,
    Metrics,
    Lists,
    CatalogItems,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::Segments,
        DataKind::Campaigns,
        DataKind::Flows,
        DataKind::Metrics,
        DataKind::Lists,
        DataKind::CatalogItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Segments => "segments",
            DataKind::Campaigns => "campaigns",
            DataKind::Flows => "flows",
            DataKind::Metrics => "metrics",
            DataKind::Lists => "lists",
            DataKind::CatalogItems => "catalog_items",
        }
    }

    /// Worker operation that serves this kind
    pub fn operation(&self) -> &'static str {
        match self {
            DataKind::Segments => "get_segments",
            DataKind::Campaigns => "get_campaigns",
            DataKind::Flows => "get_flows",
            DataKind::Metrics => "get_metrics",
            DataKind::Lists => "get_lists",
            DataKind::CatalogItems => "get_catalog_items",
        }
    }

    /// A critical kind that is empty or failed invalidates the run.
    pub fn is_critical(&self) -> bool {
        matches!(self, DataKind::Segments | DataKind::Campaigns)
    }

    /// Field projection requested from the worker
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            DataKind::Segments => &["name", "definition", "created", "updated", "is_active"],
            DataKind::Campaigns => &["name", "status", "created_at", "send_time", "audiences"],
            DataKind::Flows => &["name", "status", "created", "updated", "trigger_type"],
            DataKind::Metrics | DataKind::Lists => &["name", "created", "updated"],
            DataKind::CatalogItems => &[
                "title",
                "description",
                "price",
                "external_id",
                "url",
                "image_full_url",
                "published",
            ],
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid date range: start {start} is after end {end}")]
pub struct InvalidDateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Inclusive calendar date range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = InvalidDateRange;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidDateRange> {
        if start > end {
            return Err(InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Account coordinates needed to reach its worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountTarget {
    /// Internal alias, also the pool key
    pub alias: String,
    pub platform_account_id: String,
    /// Reference resolved to a secret at spawn time
    pub credential_ref: String,
}

impl AccountTarget {
    pub fn new(
        alias: impl Into<String>,
        platform_account_id: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            platform_account_id: platform_account_id.into(),
            credential_ref: credential_ref.into(),
        }
    }
}

/// Cache key for one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub account: String,
    pub platform_account_id: String,
    pub range: DateRange,
    pub kind: DataKind,
}

impl FetchRequest {
    pub fn new(target: &AccountTarget, range: DateRange, kind: DataKind) -> Self {
        Self {
            account: target.alias.clone(),
            platform_account_id: target.platform_account_id.clone(),
            range,
            kind,
        }
    }

    /// Request parameters sent to the worker.
    pub fn parameters(&self) -> Value {
        let mut params = json!({
            "account_id": self.platform_account_id,
            "fields": self.kind.fields(),
        });
        if self.kind == DataKind::Campaigns {
            params["start_date"] = json!(self.range.start().to_string());
            params["end_date"] = json!(self.range.end().to_string());
        }
        params
    }
}

/// Records fetched for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub kind: DataKind,
    pub account: String,
    pub records: Vec<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn new(request: &FetchRequest, records: Vec<Value>) -> Self {
        Self {
            kind: request.kind,
            account: request.account.clone(),
            records,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one kind in a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub enum KindOutcome {
    Ok(FetchResult),
    /// Non-critical kind that failed; treated as empty
    Degraded { kind: DataKind, reason: String },
    /// Critical kind that failed while fail-fast was disabled
    Fatal { kind: DataKind, error: String },
}

impl KindOutcome {
    pub fn kind(&self) -> DataKind {
        match self {
            KindOutcome::Ok(result) => result.kind,
            KindOutcome::Degraded { kind, .. } | KindOutcome::Fatal { kind, .. } => *kind,
        }
    }
}

/// Result of fetching every data kind for an account and range.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub account: String,
    pub range: DateRange,
    pub outcomes: BTreeMap<DataKind, KindOutcome>,
    pub advisories: Vec<String>,
}

impl AggregateResult {
    pub fn new(account: impl Into<String>, range: DateRange) -> Self {
        Self {
            account: account.into(),
            range,
            outcomes: BTreeMap::new(),
            advisories: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: KindOutcome) -> Self {
        self.insert(outcome);
        self
    }

    pub fn insert(&mut self, outcome: KindOutcome) {
        if let KindOutcome::Degraded { kind, reason } = &outcome {
            self.advisories
                .push(format!("{} unavailable, continuing without it: {}", kind, reason));
        }
        self.outcomes.insert(outcome.kind(), outcome);
    }

    pub fn outcome(&self, kind: DataKind) -> Option<&KindOutcome> {
        self.outcomes.get(&kind)
    }

    /// Records for a kind; empty when degraded, failed, or absent.
    pub fn records(&self, kind: DataKind) -> &[Value] {
        match self.outcomes.get(&kind) {
            Some(KindOutcome::Ok(result)) => &result.records,
            _ => &[],
        }
    }

    pub fn is_degraded(&self, kind: DataKind) -> bool {
        matches!(self.outcomes.get(&kind), Some(KindOutcome::Degraded { .. }))
    }

    /// Context map handed to generation: kind name to records.
    pub fn to_context(&self) -> Value {
        let map: serde_json::Map<String, Value> = DataKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), Value::Array(self.records(*kind).to_vec())))
            .collect();
        Value::Object(map)
    }
}
