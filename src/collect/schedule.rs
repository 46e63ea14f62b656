//! Advisory collection scheduling over historical observations.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One statistics observation per collection attempt, recorded for later
/// scheduling use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub success: bool,
    pub response_time_ms: u64,
    pub quality_score: f64,
}

/// In-memory collection history, keyed by source.
#[derive(Debug, Default)]
pub struct CollectionStats {
    history: HashMap<String, Vec<Observation>>,
}

impl CollectionStats {
    pub fn record(&mut self, observation: Observation) {
        self.history
            .entry(observation.source.clone())
            .or_default()
            .push(observation);
    }

    pub fn history(&self, source: &str) -> &[Observation] {
        self.history.get(source).map_or(&[], Vec::as_slice)
    }

    pub fn total_observations(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    pub fn failures(&self, source: &str) -> usize {
        self.history(source).iter().filter(|o| !o.success).count()
    }
}

/// Predicts, per hour of day, the probability that collecting a source
/// succeeds. Absence of a prediction is never an error; the collector
/// defaults to collecting now.
pub trait SchedulePredictor: Send + Sync {
    fn predict(&self, history: &[Observation]) -> HashMap<u32, f64>;
}

/// Success rate grouped by hour of day over the source's history.
#[derive(Debug, Clone, Copy, Default)]
pub struct HourlySuccessPredictor;

impl SchedulePredictor for HourlySuccessPredictor {
    fn predict(&self, history: &[Observation]) -> HashMap<u32, f64> {
        let mut per_hour: HashMap<u32, (usize, usize)> = HashMap::new();
        for obs in history {
            let entry = per_hour.entry(obs.timestamp.hour()).or_insert((0, 0));
            entry.1 += 1;
            if obs.success {
                entry.0 += 1;
            }
        }
        per_hour
            .into_iter()
            .map(|(hour, (ok, total))| (hour, ok as f64 / total as f64))
            .collect()
    }
}
