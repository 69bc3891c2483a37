//! Structured calendar artifact produced by the structuring stage.
//!
//! A [`CalendarArtifact`] is the collection of [`GeneratedItem`]s that is
//! persisted for review and later consumed by the brief stage. Each item
//! carries a [`CategoryTag`] from a fixed set of channels. Tags that cannot be
//! resolved are kept on the item as [`CategoryTag::Unrecognized`] or
//! [`CategoryTag::Missing`] so downstream validation can report them.
//!
//! [`CalendarArtifact::from_value`] accepts the loose shapes the generation
//! service and external editors emit:
//!
//! ```text
//! [ {...}, {...} ]
//! { "items": [...] } | { "campaigns": [...] } | { "events": [...] } | { "calendar": [...] }
//! ```

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CONTAINER_KEYS: [&str; 4] = ["items", "campaigns", "events", "calendar"];
const CATEGORY_KEYS: [&str; 2] = ["category", "channel"];
const DATE_KEYS: [&str; 3] = ["scheduled_date", "send_date", "date"];
const AUDIENCE_KEYS: [&str; 6] = ["segment_id", "segment_name", "segment", "list_id", "list_name", "list"];

/// Errors raised when an artifact does not match the calendar schema
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// Root value is neither an array nor an object with a known item list
    #[error("Unrecognized artifact shape: {0}")]
    UnrecognizedShape(String),

    /// One item failed validation
    #[error("Item [{index}] is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },
}

/// Output channel an item is scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Email,
    Sms,
    Push,
}

impl ItemCategory {
    pub const ALL: [ItemCategory; 3] = [ItemCategory::Email, ItemCategory::Sms, ItemCategory::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCategory::Email => "email",
            ItemCategory::Sms => "sms",
            ItemCategory::Push => "push",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ItemCategory::Email),
            "sms" => Ok(ItemCategory::Sms),
            "push" => Ok(ItemCategory::Push),
            other => Err(format!("unknown item category '{}'", other)),
        }
    }
}

/// Category tag as found on a generated item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum CategoryTag {
    Known(ItemCategory),
    Unrecognized(String),
    #[default]
    Missing,
}

impl CategoryTag {
    pub fn known(&self) -> Option<ItemCategory> {
        match self {
            CategoryTag::Known(category) => Some(*category),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return CategoryTag::Missing;
        }
        match raw.parse::<ItemCategory>() {
            Ok(category) => CategoryTag::Known(category),
            Err(_) => CategoryTag::Unrecognized(raw.to_string()),
        }
    }
}

impl From<Option<String>> for CategoryTag {
    fn from(raw: Option<String>) -> Self {
        match raw {
            Some(raw) => CategoryTag::parse(&raw),
            None => CategoryTag::Missing,
        }
    }
}

impl From<CategoryTag> for Option<String> {
    fn from(tag: CategoryTag) -> Self {
        match tag {
            CategoryTag::Known(category) => Some(category.as_str().to_string()),
            CategoryTag::Unrecognized(raw) => Some(raw),
            CategoryTag::Missing => None,
        }
    }
}

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryTag::Known(category) => write!(f, "{}", category),
            CategoryTag::Unrecognized(raw) => write!(f, "unrecognized '{}'", raw),
            CategoryTag::Missing => f.write_str("missing"),
        }
    }
}

/// One scheduled calendar entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedItem {
    #[serde(default)]
    pub category: CategoryTag,
    pub scheduled_date: NaiveDate,
    /// Free-form content (name, audience, copy notes, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl GeneratedItem {
    pub fn new(category: CategoryTag, scheduled_date: NaiveDate) -> Self {
        Self {
            category,
            scheduled_date,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Human readable label used when cross-referencing briefs.
    pub fn label(&self) -> Option<&str> {
        ["name", "title", "campaign_id", "id"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
    }

    /// Field shape problems that do not make the item unusable.
    ///
    /// `send_time` must be `HH:MM`; a non-empty `audience` must be an object
    /// naming a segment or a list.
    pub fn schema_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.fields.get("send_time") {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) if raw.trim().is_empty() => {}
            Some(Value::String(raw)) if NaiveTime::parse_from_str(raw.trim(), "%H:%M").is_ok() => {}
            Some(other) => warnings.push(format!("send_time {} is not HH:MM", other)),
        }

        match self.fields.get("audience") {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) if raw.is_empty() => {}
            Some(Value::Object(audience)) if audience.is_empty() => {}
            Some(Value::Object(audience)) => {
                if !AUDIENCE_KEYS.iter().any(|key| audience.contains_key(*key)) {
                    warnings.push("audience names no segment or list".to_string());
                }
            }
            Some(other) => warnings.push(format!("audience must be an object, got {}", json_type(other))),
        }

        warnings
    }

    fn from_object(index: usize, mut object: Map<String, Value>) -> Result<Self, ArtifactError> {
        let category = match CATEGORY_KEYS.iter().find(|key| object.contains_key(**key)) {
            Some(key) => match object.remove(*key) {
                Some(Value::String(raw)) => CategoryTag::parse(&raw),
                Some(Value::Null) | None => CategoryTag::Missing,
                Some(other) => CategoryTag::Unrecognized(other.to_string()),
            },
            None => object
                .get("type")
                .and_then(Value::as_str)
                .map(category_from_type)
                .unwrap_or_default(),
        };
        // Canonical keys must not linger in the flattened map.
        object.remove("category");

        let date_key = DATE_KEYS
            .iter()
            .find(|key| object.contains_key(**key))
            .ok_or_else(|| ArtifactError::InvalidItem {
                index,
                reason: "missing scheduled date".to_string(),
            })?;
        let raw_date = object.remove(*date_key).unwrap_or(Value::Null);
        let scheduled_date = parse_date(&raw_date).ok_or_else(|| ArtifactError::InvalidItem {
            index,
            reason: format!("invalid scheduled date {}", raw_date),
        })?;
        object.remove("scheduled_date");

        Ok(Self {
            category,
            scheduled_date,
            fields: object,
        })
    }
}

fn category_from_type(kind: &str) -> CategoryTag {
    let kind = kind.trim().to_ascii_lowercase();
    ItemCategory::ALL
        .iter()
        .find(|category| kind == category.as_str() || kind.starts_with(&format!("{}-", category)))
        .map(|category| CategoryTag::Known(*category))
        .unwrap_or_default()
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// The structured stage-2 artifact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalendarArtifact {
    pub items: Vec<GeneratedItem>,
}

impl CalendarArtifact {
    pub fn new(items: Vec<GeneratedItem>) -> Self {
        Self { items }
    }

    /// Build an artifact from any supported JSON shape.
    pub fn from_value(value: Value) -> Result<Self, ArtifactError> {
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut object) => CONTAINER_KEYS
                .iter()
                .find_map(|key| match object.remove(*key) {
                    Some(Value::Array(entries)) => Some(entries),
                    _ => None,
                })
                .ok_or_else(|| {
                    ArtifactError::UnrecognizedShape(
                        "expected an array or an object with 'items', 'campaigns', 'events' or 'calendar'"
                            .to_string(),
                    )
                })?,
            other => {
                return Err(ArtifactError::UnrecognizedShape(format!(
                    "root must be an array or object, got {}",
                    json_type(&other)
                )))
            }
        };

        let items = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                Value::Object(object) => GeneratedItem::from_object(index, object),
                other => Err(ArtifactError::InvalidItem {
                    index,
                    reason: format!("expected an object, got {}", json_type(&other)),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item counts per known category. Unrecognized and missing tags are not counted.
    pub fn count_by_category(&self) -> BTreeMap<ItemCategory, usize> {
        let mut counts = BTreeMap::new();
        for category in self.items.iter().filter_map(|item| item.category.known()) {
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    /// Indices and tags of items whose category could not be resolved.
    pub fn category_defects(&self) -> Vec<(usize, &CategoryTag)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.category.known().is_none())
            .map(|(index, item)| (index, &item.category))
            .collect()
    }

    /// [`GeneratedItem::schema_warnings`] for every item, prefixed with the
    /// item's label or position.
    pub fn schema_warnings(&self) -> Vec<String> {
        self.items
            .iter()
            .enumerate()
            .flat_map(|(index, item)| {
                let name = item
                    .label()
                    .map(|label| format!("item '{}'", label))
                    .unwrap_or_else(|| format!("item #{}", index + 1));
                item.schema_warnings()
                    .into_iter()
                    .map(move |warning| format!("{}: {}", name, warning))
            })
            .collect()
    }

    /// Items scheduled outside `[start, end]`.
    pub fn items_outside(&self, start: NaiveDate, end: NaiveDate) -> Vec<&GeneratedItem> {
        self.items
            .iter()
            .filter(|item| item.scheduled_date < start || item.scheduled_date > end)
            .collect()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_from_value_campaigns_object() {
        let artifact = CalendarArtifact::from_value(json!({
            "campaigns": [
                {"name": "Holiday launch", "channel": "email", "send_date": "2025-12-02"},
                {"name": "Flash sale", "channel": "SMS", "send_date": "2025-12-05"}
            ]
        }))
        .unwrap();

        assert_eq!(artifact.len(), 2);
        assert_eq!(artifact.items[0].category, CategoryTag::Known(ItemCategory::Email));
        assert_eq!(artifact.items[1].category, CategoryTag::Known(ItemCategory::Sms));
        assert_eq!(artifact.items[0].scheduled_date, date("2025-12-02"));
        assert_eq!(artifact.items[0].label(), Some("Holiday launch"));
        assert!(!artifact.items[0].fields.contains_key("channel"));
    }

    #[test]
    fn test_category_from_type_prefix() {
        let artifact = CalendarArtifact::from_value(json!([
            {"type": "sms-promotional", "date": "2025-12-01"},
            {"type": "promotional", "date": "2025-12-02"}
        ]))
        .unwrap();

        assert_eq!(artifact.items[0].category, CategoryTag::Known(ItemCategory::Sms));
        assert_eq!(artifact.items[1].category, CategoryTag::Missing);
        assert_eq!(artifact.items[1].fields.get("type"), Some(&json!("promotional")));
    }

    #[test]
    fn test_unrecognized_category_is_kept() {
        let artifact = CalendarArtifact::from_value(json!({
            "items": [
                {"category": "carrier-pigeon", "scheduled_date": "2025-12-01"},
                {"category": "email", "scheduled_date": "2025-12-02"}
            ]
        }))
        .unwrap();

        assert_eq!(artifact.len(), 2);
        assert_eq!(
            artifact.items[0].category,
            CategoryTag::Unrecognized("carrier-pigeon".to_string())
        );
        let defects = artifact.category_defects();
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].0, 0);
        assert_eq!(artifact.count_by_category().get(&ItemCategory::Email), Some(&1));
    }

    #[test]
    fn test_missing_date_is_rejected() {
        let err = CalendarArtifact::from_value(json!([{"channel": "email"}])).unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidItem { index: 0, .. }));
    }

    #[test]
    fn test_datetime_is_truncated_to_date() {
        let artifact =
            CalendarArtifact::from_value(json!([{"channel": "push", "send_date": "2025-12-03T10:00:00Z"}]))
                .unwrap();
        assert_eq!(artifact.items[0].scheduled_date, date("2025-12-03"));
    }

    #[test]
    fn test_unrecognized_shape() {
        let err = CalendarArtifact::from_value(json!({"foo": []})).unwrap_err();
        assert!(matches!(err, ArtifactError::UnrecognizedShape(_)));

        let err = CalendarArtifact::from_value(json!("text")).unwrap_err();
        assert!(matches!(err, ArtifactError::UnrecognizedShape(_)));
    }

    #[test]
    fn test_canonical_serde_shape() {
        let item = GeneratedItem::new(CategoryTag::Known(ItemCategory::Sms), date("2025-12-09"))
            .with_field("name", "Reminder");
        let artifact = CalendarArtifact::new(vec![item]);

        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(
            value,
            json!({"items": [{"category": "sms", "scheduled_date": "2025-12-09", "name": "Reminder"}]})
        );

        let back: CalendarArtifact = serde_json::from_value(value).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_items_outside_range() {
        let artifact = CalendarArtifact::from_value(json!([
            {"channel": "email", "date": "2025-11-30"},
            {"channel": "email", "date": "2025-12-15"}
        ]))
        .unwrap();

        let outside = artifact.items_outside(date("2025-12-01"), date("2025-12-31"));
        assert_eq!(outside.len(), 1);
        assert_eq!(outside[0].scheduled_date, date("2025-11-30"));
    }

    #[test]
    fn test_schema_warnings() {
        let artifact = CalendarArtifact::from_value(json!([
            {"name": "Launch", "channel": "email", "date": "2025-12-02",
             "send_time": "09:30", "audience": {"segment_id": "vip"}},
            {"name": "Late Send", "channel": "sms", "date": "2025-12-03",
             "send_time": "9am", "audience": "everyone"},
            {"channel": "push", "date": "2025-12-04", "audience": {"size": 1200}}
        ]))
        .unwrap();

        assert!(artifact.items[0].schema_warnings().is_empty());
        let warnings = artifact.schema_warnings();
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[0], "item 'Late Send': send_time \"9am\" is not HH:MM");
        assert_eq!(warnings[1], "item 'Late Send': audience must be an object, got string");
        assert_eq!(warnings[2], "item #3: audience names no segment or list");
    }
}
