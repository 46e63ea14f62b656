use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single raw item as fetched from a source. Field maps are backed by
/// a BTreeMap, so serialization is always key-sorted.
pub type Record = serde_json::Map<String, Value>;

/// Raw collection result for one source, before the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub source: String,
    pub fields: Record,
    pub collected_at: DateTime<Utc>,
}

/// Per-batch admission metrics, each in [0, 1]. Attached to the message
/// that carries the batch so downstream agents never recompute them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub consistency: f64,
    pub freshness: f64,
    pub validity: f64,
}

impl QualityMetrics {
    pub fn score(&self) -> f64 {
        (self.completeness + self.consistency + self.freshness + self.validity) / 4.0
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            consistency: 1.0,
            freshness: 1.0,
            validity: 1.0,
        }
    }
}
