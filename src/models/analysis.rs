use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Derived insight object produced by the analyzer for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub stats: HashMap<String, ColumnStats>,
    pub trends: HashMap<String, Trend>,
    pub correlations: Vec<Correlation>,
    pub anomalies: HashMap<String, AnomalySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub a: String,
    pub b: String,
    pub r: f64,
}

/// IQR fence summary for one numeric column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub count: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
}
