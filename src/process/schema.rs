//! Source schemas: required fields plus type coercions. Records that miss
//! a required field or fail a coercion are dropped, never repaired.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::PulseError;
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub field_types: HashMap<String, FieldType>,
}

/// Maps source names to their schemas. Sources without a schema are
/// accepted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default, flatten)]
    schemas: HashMap<String, SourceSchema>,
}

impl SchemaRegistry {
    pub fn load(path: &Path) -> Result<Self, PulseError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PulseError::Config(format!("cannot read schema file {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn insert(&mut self, source: impl Into<String>, schema: SourceSchema) {
        self.schemas.insert(source.into(), schema);
    }

    pub fn get(&self, source: &str) -> Option<&SourceSchema> {
        self.schemas.get(source)
    }

    /// Validate a batch, returning the accepted records and the drop count.
    pub fn validate_batch(&self, source: &str, records: Vec<Record>) -> (Vec<Record>, usize) {
        let Some(schema) = self.get(source) else {
            return (records, 0);
        };
        let total = records.len();
        let valid: Vec<Record> = records
            .into_iter()
            .filter_map(|r| validate_record(schema, r))
            .collect();
        let dropped = total - valid.len();
        if dropped > 0 {
            debug!(source, dropped, kept = valid.len(), "Schema validation dropped records");
        }
        (valid, dropped)
    }
}

fn validate_record(schema: &SourceSchema, mut record: Record) -> Option<Record> {
    for field in &schema.required {
        match record.get(field) {
            None | Some(Value::Null) => return None,
            Some(_) => {}
        }
    }
    for (field, ty) in &schema.field_types {
        if let Some(value) = record.get(field) {
            if value.is_null() {
                continue;
            }
            let coerced = coerce(value, *ty)?;
            record.insert(field.clone(), coerced);
        }
    }
    Some(record)
}

/// Coerce a value to the declared type, or None when it cannot be.
fn coerce(value: &Value, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
    }
}
