//! Outer join of per-source batches into one row per join-key value.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::config::{ConflictRule, MergeConfig};
use crate::models::{Record, VersionedBatch};

/// Merge the latest batch of every source on the configured join key.
///
/// Rows whose join value is absent or non-scalar are skipped. The result
/// is an outer join: a key seen in any source produces a row, with fields
/// union-ed across sources. Field collisions resolve per the conflict
/// rule, except the join key itself which is always written once.
pub fn merge_batches(batches: &[VersionedBatch], config: &MergeConfig) -> Vec<Record> {
    let mut merged: BTreeMap<String, Record> = BTreeMap::new();
    let mut skipped = 0usize;

    for batch in batches {
        for record in &batch.records {
            let Some(key) = join_value(record, &config.join_key) else {
                skipped += 1;
                continue;
            };
            let row = merged.entry(key.clone()).or_default();
            row.insert(config.join_key.clone(), Value::String(key));
            for (field, value) in record {
                if field == &config.join_key {
                    continue;
                }
                match config.on_conflict {
                    ConflictRule::FirstWins => {
                        row.entry(field.clone()).or_insert_with(|| value.clone());
                    }
                    ConflictRule::LastWins => {
                        row.insert(field.clone(), value.clone());
                    }
                }
            }
        }
    }

    if skipped > 0 {
        debug!(skipped, join_key = %config.join_key, "Skipped records without a usable join value");
    }
    merged.into_values().collect()
}

/// Join values must be scalar; strings are used verbatim, numbers by
/// their display form.
fn join_value(record: &Record, join_key: &str) -> Option<String> {
    match record.get(join_key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
