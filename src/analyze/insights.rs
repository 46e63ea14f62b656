//! Statistical analysis of processed batches and the plain-language
//! insight strings derived from it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::collect::anomaly::quartiles;
use crate::errors::PulseError;
use crate::models::{
    AnalysisReport, AnomalySummary, ColumnStats, Correlation, Record, Trend, TrendDirection,
};

/// Turns a batch of records into an analysis report. Swappable so tests
/// can inject canned reports.
pub trait InsightGenerator: Send + Sync {
    fn analyze(&self, records: &[Record]) -> Result<AnalysisReport, PulseError>;
}

const STRONG_TREND_R_SQUARED: f64 = 0.7;
const STRONG_CORRELATION_R: f64 = 0.7;
const IQR_FENCE: f64 = 1.5;
const MIN_POINTS: usize = 3;

/// Descriptive stats, least-squares trends, pairwise correlations, and
/// IQR anomaly counts over every numeric column.
#[derive(Debug, Clone, Default)]
pub struct StatsGenerator;

impl InsightGenerator for StatsGenerator {
    fn analyze(&self, records: &[Record]) -> Result<AnalysisReport, PulseError> {
        if records.is_empty() {
            return Err(PulseError::Analysis("empty batch".to_string()));
        }
        let columns = numeric_columns(records);
        let mut report = AnalysisReport::default();

        for (name, values) in &columns {
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            if present.is_empty() {
                continue;
            }
            report
                .stats
                .insert(name.clone(), column_stats(&present, records.len()));
            if let Some(trend) = fit_trend(values) {
                report.trends.insert(name.clone(), trend);
            }
            if let Some(summary) = anomaly_summary(&present) {
                report.anomalies.insert(name.clone(), summary);
            }
        }

        let names: Vec<&String> = columns.keys().collect();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if let Some(r) = pearson(&columns[*a], &columns[*b]) {
                    report.correlations.push(Correlation {
                        a: (*a).clone(),
                        b: (*b).clone(),
                        r,
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Numeric columns aligned to record index; None marks a record where the
/// field is absent or non-numeric.
fn numeric_columns(records: &[Record]) -> BTreeMap<String, Vec<Option<f64>>> {
    let mut columns: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    for record in records {
        for (key, value) in record {
            if value.is_number() {
                columns.entry(key.clone()).or_default();
            }
        }
    }
    for (name, values) in &mut columns {
        for record in records {
            values.push(match record.get(name) {
                Some(Value::Number(n)) => n.as_f64(),
                _ => None,
            });
        }
    }
    columns
}

fn column_stats(present: &[f64], total: usize) -> ColumnStats {
    let count = present.len();
    let mean = present.iter().sum::<f64>() / count as f64;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ColumnStats {
        count,
        missing: total - count,
        mean,
        std_dev: variance.sqrt(),
        min,
        max,
    }
}

/// Least-squares line of the column against record index. None when too
/// few points or the column is constant.
fn fit_trend(values: &[Option<f64>]) -> Option<Trend> {
    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .collect();
    if points.len() < MIN_POINTS {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let ss_xx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let ss_yy: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_xy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    if ss_xx == 0.0 || ss_yy == 0.0 {
        return None;
    }
    let slope = ss_xy / ss_xx;
    Some(Trend {
        slope,
        intercept: mean_y - slope * mean_x,
        r_squared: (ss_xy * ss_xy) / (ss_xx * ss_yy),
        direction: if slope >= 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        },
    })
}

/// Pearson r over the rows where both columns are present. None when the
/// overlap is too small or either side is constant.
fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < MIN_POINTS {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let ss_xx: f64 = pairs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let ss_yy: f64 = pairs.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_xy: f64 = pairs
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    if ss_xx == 0.0 || ss_yy == 0.0 {
        return None;
    }
    Some(ss_xy / (ss_xx.sqrt() * ss_yy.sqrt()))
}

fn anomaly_summary(present: &[f64]) -> Option<AnomalySummary> {
    if present.len() < 4 {
        return None;
    }
    let mut sorted = present.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let (q1, q3) = quartiles(&sorted);
    let iqr = q3 - q1;
    let lower_bound = q1 - IQR_FENCE * iqr;
    let upper_bound = q3 + IQR_FENCE * iqr;
    let count = present
        .iter()
        .filter(|v| **v < lower_bound || **v > upper_bound)
        .count();
    Some(AnomalySummary {
        count,
        lower_bound,
        upper_bound,
    })
}

/// Plain-language summary lines for a report. Strong relationships only:
/// weak trends and correlations stay out of the list.
pub fn generate_insights(report: &AnalysisReport, patterns: &[String]) -> Vec<String> {
    let mut insights = Vec::new();

    let mut trends: Vec<(&String, &Trend)> = report.trends.iter().collect();
    trends.sort_by(|a, b| a.0.cmp(b.0));
    for (column, trend) in trends {
        if trend.r_squared > STRONG_TREND_R_SQUARED {
            insights.push(format!(
                "{} shows a strong {} trend (r²={:.2})",
                column, trend.direction, trend.r_squared
            ));
        }
    }

    for corr in &report.correlations {
        if corr.r.abs() > STRONG_CORRELATION_R {
            let sense = if corr.r > 0.0 { "positive" } else { "negative" };
            insights.push(format!(
                "strong {} correlation between {} and {} (r={:.2})",
                sense, corr.a, corr.b, corr.r
            ));
        }
    }

    let mut anomalies: Vec<(&String, &AnomalySummary)> = report
        .anomalies
        .iter()
        .filter(|(_, s)| s.count > 0)
        .collect();
    anomalies.sort_by(|a, b| a.0.cmp(b.0));
    for (column, summary) in anomalies {
        insights.push(format!(
            "{} outlier value(s) detected in {}",
            summary.count, column
        ));
    }

    if !patterns.is_empty() {
        insights.push(format!("{} dominant pattern(s) identified", patterns.len()));
    }
    insights
}

/// Canned-report generator for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct FixedGenerator {
    pub report: AnalysisReport,
}

impl InsightGenerator for FixedGenerator {
    fn analyze(&self, _records: &[Record]) -> Result<AnalysisReport, PulseError> {
        Ok(self.report.clone())
    }
}
