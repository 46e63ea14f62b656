pub mod analysis;
pub mod batch;
pub mod record;

pub use analysis::{AnalysisReport, AnomalySummary, ColumnStats, Correlation, Trend, TrendDirection};
pub use batch::{content_hash, LatestPointer, VersionedBatch};
pub use record::{CollectionRecord, QualityMetrics, Record};
