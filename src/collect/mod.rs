pub mod anomaly;
pub mod fetch;
pub mod quality;
pub mod schedule;

pub use anomaly::{AnomalyClassifier, IqrClassifier};
pub use fetch::{fetch_with_retry, FetchOutcome, HttpFetcher, SourceFetcher};
pub use quality::{compute_quality, numeric_features};
pub use schedule::{CollectionStats, HourlySuccessPredictor, Observation, SchedulePredictor};
