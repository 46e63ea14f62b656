pub mod types;

use std::path::Path;

use tracing::info;

use crate::errors::PulseError;

pub use types::{
    AnalyzerConfig, CollectorConfig, ConflictRule, ManagerConfig, MergeConfig, PipelineConfig,
    ProcessorConfig, SourceConfig,
};

impl PipelineConfig {
    /// Load configuration from a YAML file, falling back to defaults when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, PulseError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PulseError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), sources = config.collector.sources.len(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        for source in &self.collector.sources {
            if source.name.is_empty() {
                return Err(PulseError::Config("source with empty name".into()));
            }
            if source.url.is_empty() {
                return Err(PulseError::Config(format!(
                    "source {} has no url",
                    source.name
                )));
            }
        }
        if self.processor.merge.join_key.is_empty() {
            return Err(PulseError::Config("merge join_key must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config.collector.interval_secs, 300);
        assert_eq!(config.processor.interval_secs, 1800);
        assert_eq!(config.collector.retry.max_retries, 3);
        assert_eq!(config.processor.merge.join_key, "neighborhood");
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
output_dir: /tmp/pulse
collector:
  interval_secs: 60
  sources:
    - name: crime
      url: https://data.sfgov.org/resource/wg3w-h783.json
      params:
        "$limit": "500"
processor:
  merge:
    join_key: district
    on_conflict: last-wins
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.collector.interval_secs, 60);
        assert_eq!(config.collector.sources.len(), 1);
        assert_eq!(config.collector.sources[0].max_records, 50);
        assert_eq!(config.processor.merge.join_key, "district");
        assert_eq!(config.processor.merge.on_conflict, ConflictRule::LastWins);
    }

    #[test]
    fn test_rejects_source_without_url() {
        let yaml = r#"
collector:
  sources:
    - name: crime
      url: ""
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
