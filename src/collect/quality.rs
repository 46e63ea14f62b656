//! Per-batch quality metrics computed before the anomaly gate.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::models::{CollectionRecord, QualityMetrics};

/// Fields checked, in order, when scoring freshness. Records carrying none
/// of these count as fresh.
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "incident_datetime", "datetime", "date", "updated_at"];

pub fn compute_quality(records: &[CollectionRecord], freshness_window: Duration) -> QualityMetrics {
    if records.is_empty() {
        return QualityMetrics {
            completeness: 0.0,
            consistency: 0.0,
            freshness: 0.0,
            validity: 0.0,
        };
    }
    QualityMetrics {
        completeness: completeness(records),
        consistency: consistency(records),
        freshness: freshness(records, freshness_window),
        validity: validity(records),
    }
}

/// Fraction of non-null cells over the union of keys seen in the batch.
fn completeness(records: &[CollectionRecord]) -> f64 {
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();
    if keys.is_empty() {
        return 0.0;
    }
    let total = records.len() * keys.len();
    let filled = records
        .iter()
        .map(|r| {
            keys.iter()
                .filter(|k| matches!(r.fields.get(**k), Some(v) if !v.is_null()))
                .count()
        })
        .sum::<usize>();
    filled as f64 / total as f64
}

/// Fraction of cells whose JSON type matches the majority type for that key.
fn consistency(records: &[CollectionRecord]) -> f64 {
    let mut by_key: HashMap<&str, HashMap<&'static str, usize>> = HashMap::new();
    let mut total = 0usize;
    for record in records {
        for (key, value) in &record.fields {
            if value.is_null() {
                continue;
            }
            *by_key
                .entry(key.as_str())
                .or_default()
                .entry(value_type(value))
                .or_insert(0) += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    let majority: usize = by_key
        .values()
        .map(|counts| counts.values().copied().max().unwrap_or(0))
        .sum();
    majority as f64 / total as f64
}

/// Fraction of records whose timestamp (when present and parseable) falls
/// within the freshness window.
fn freshness(records: &[CollectionRecord], window: Duration) -> f64 {
    let cutoff = Utc::now() - window;
    let fresh = records
        .iter()
        .filter(|r| match record_timestamp(r) {
            Some(ts) => ts >= cutoff,
            None => true,
        })
        .count();
    fresh as f64 / records.len() as f64
}

/// Fraction of records that are non-empty and carry no empty-string values.
fn validity(records: &[CollectionRecord]) -> f64 {
    let valid = records
        .iter()
        .filter(|r| {
            !r.fields.is_empty()
                && r.fields
                    .values()
                    .all(|v| !matches!(v, Value::String(s) if s.is_empty()))
        })
        .count();
    valid as f64 / records.len() as f64
}

fn record_timestamp(record: &CollectionRecord) -> Option<DateTime<Utc>> {
    for field in TIMESTAMP_FIELDS {
        if let Some(Value::String(raw)) = record.fields.get(*field) {
            if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
                return Some(ts.with_timezone(&Utc));
            }
        }
    }
    None
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-record numeric feature vectors for the anomaly classifier: the
/// union of numeric keys in sorted order, NaN where a record lacks one.
pub fn numeric_features(records: &[CollectionRecord]) -> Vec<Vec<f64>> {
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| {
            r.fields
                .iter()
                .filter(|(_, v)| v.is_number())
                .map(|(k, _)| k.as_str())
        })
        .collect();
    records
        .iter()
        .map(|r| {
            keys.iter()
                .map(|k| {
                    r.fields
                        .get(*k)
                        .and_then(Value::as_f64)
                        .unwrap_or(f64::NAN)
                })
                .collect()
        })
        .collect()
}
