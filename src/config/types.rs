use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::RetryPolicy;

/// Top-level pipeline configuration, constructed once at startup and passed
/// by reference to each component that needs it. No component reads ambient
/// global state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("processed_data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Idle wait between collection cycles, seconds.
    #[serde(default = "default_collect_interval")]
    pub interval_secs: u64,
    /// Per-request timeout for source fetches, seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Skip a source this hour when its predicted success probability
    /// drops below this value. Advisory only.
    #[serde(default = "default_min_success_probability")]
    pub min_success_probability: f64,
    /// Records older than this window count against freshness.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_days: i64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_collect_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_min_success_probability() -> f64 {
    0.1
}

fn default_freshness_window() -> i64 {
    30
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_collect_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            min_success_probability: default_min_success_probability(),
            freshness_window_days: default_freshness_window(),
            retry: RetryPolicy::default(),
            sources: Vec::new(),
        }
    }
}

/// One upstream data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Header to carry the credential, e.g. "Authorization".
    #[serde(default)]
    pub auth_header: Option<String>,
    /// Environment variable holding the credential. Read at fetch time so
    /// keys never land in config files.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Idle wait between processing cycles, seconds.
    #[serde(default = "default_process_interval")]
    pub interval_secs: u64,
    /// Merge the latest batches of every source into the derived view
    /// once per this many cycles.
    #[serde(default = "default_merge_every")]
    pub merge_every: u32,
    /// Optional YAML file of per-source schemas. Sources without an entry
    /// are accepted as-is.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    #[serde(default)]
    pub merge: MergeConfig,
}

fn default_process_interval() -> u64 {
    1800
}

fn default_merge_every() -> u32 {
    1
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_process_interval(),
            merge_every: default_merge_every(),
            schema_file: None,
            merge: MergeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Common join key across sources.
    #[serde(default = "default_join_key")]
    pub join_key: String,
    #[serde(default)]
    pub on_conflict: ConflictRule,
}

fn default_join_key() -> String {
    "neighborhood".to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            join_key: default_join_key(),
            on_conflict: ConflictRule::default(),
        }
    }
}

/// What to do when two sources disagree on a field for the same join key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictRule {
    #[default]
    FirstWins,
    LastWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Idle wait between analysis cycles, seconds.
    #[serde(default = "default_analyze_interval")]
    pub interval_secs: u64,
}

fn default_analyze_interval() -> u64 {
    600
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_analyze_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Grace period a full-system stop waits for each agent's cleanup
    /// before escalating to forced termination.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_stop_grace() -> u64 {
    10
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace(),
        }
    }
}
