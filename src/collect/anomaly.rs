//! Anomaly gate over per-record numeric feature vectors.

/// Per-record keep/drop verdict over numeric feature vectors. One verdict
/// per input row; true means keep.
pub trait AnomalyClassifier: Send + Sync {
    fn classify(&self, features: &[Vec<f64>]) -> Vec<bool>;
}

/// Flags a record when any feature falls outside the IQR fences of its
/// column. NaN features (missing values) are never flagged.
#[derive(Debug, Clone)]
pub struct IqrClassifier {
    pub fence: f64,
}

impl Default for IqrClassifier {
    fn default() -> Self {
        Self { fence: 1.5 }
    }
}

impl AnomalyClassifier for IqrClassifier {
    fn classify(&self, features: &[Vec<f64>]) -> Vec<bool> {
        // Quartiles are meaningless on tiny batches; keep everything.
        if features.len() < 4 {
            return vec![true; features.len()];
        }
        let columns = features.iter().map(Vec::len).max().unwrap_or(0);
        let mut bounds = Vec::with_capacity(columns);
        for col in 0..columns {
            let mut values: Vec<f64> = features
                .iter()
                .filter_map(|row| row.get(col).copied())
                .filter(|v| !v.is_nan())
                .collect();
            values.sort_by(|a, b| a.total_cmp(b));
            bounds.push(if values.len() < 4 {
                None
            } else {
                let (q1, q3) = quartiles(&values);
                let iqr = q3 - q1;
                Some((q1 - self.fence * iqr, q3 + self.fence * iqr))
            });
        }

        features
            .iter()
            .map(|row| {
                row.iter().enumerate().all(|(col, value)| {
                    if value.is_nan() {
                        return true;
                    }
                    match bounds.get(col).copied().flatten() {
                        Some((lower, upper)) => *value >= lower && *value <= upper,
                        None => true,
                    }
                })
            })
            .collect()
    }
}

/// First and third quartile by linear interpolation over a sorted slice.
pub(crate) fn quartiles(sorted: &[f64]) -> (f64, f64) {
    (percentile(sorted, 0.25), percentile(sorted, 0.75))
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let weight = rank - low as f64;
        sorted[low] * (1.0 - weight) + sorted[high] * weight
    }
}
