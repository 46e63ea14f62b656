//! Analysis stage: descriptive statistics and insight generation.

pub mod insights;

pub use insights::{generate_insights, FixedGenerator, InsightGenerator, StatsGenerator};
