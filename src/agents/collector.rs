//! Collects from every configured source each cycle: consult the
//! schedule, fetch with retry, gate anomalous records, forward the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::agent::{Agent, AgentContext, AgentIdentity};
use super::mailbox::MessagePayload;
use crate::collect::anomaly::AnomalyClassifier;
use crate::collect::fetch::{fetch_with_retry, SourceFetcher};
use crate::collect::quality::{compute_quality, numeric_features};
use crate::collect::schedule::{CollectionStats, Observation, SchedulePredictor};
use crate::config::{CollectorConfig, SourceConfig};
use crate::errors::PulseError;

pub struct CollectorAgent {
    identity: AgentIdentity,
    config: CollectorConfig,
    fetcher: Arc<dyn SourceFetcher>,
    classifier: Arc<dyn AnomalyClassifier>,
    predictor: Arc<dyn SchedulePredictor>,
    stats: CollectionStats,
    processor_id: String,
    cycles: u64,
}

impl CollectorAgent {
    pub fn new(
        identity: AgentIdentity,
        config: CollectorConfig,
        fetcher: Arc<dyn SourceFetcher>,
        classifier: Arc<dyn AnomalyClassifier>,
        predictor: Arc<dyn SchedulePredictor>,
        processor_id: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            config,
            fetcher,
            classifier,
            predictor,
            stats: CollectionStats::default(),
            processor_id: processor_id.into(),
            cycles: 0,
        }
    }

    /// Advisory only. A missing prediction for the current hour means
    /// collect now.
    fn should_collect(&self, source: &SourceConfig) -> bool {
        let predictions = self.predictor.predict(self.stats.history(&source.name));
        match predictions.get(&Utc::now().hour()) {
            Some(p) if *p < self.config.min_success_probability => {
                info!(
                    source = %source.name,
                    probability = %p,
                    "Skipping source this hour, predicted success too low"
                );
                false
            }
            _ => true,
        }
    }

    async fn collect_source(&mut self, ctx: &AgentContext, source: &SourceConfig) {
        let started = Instant::now();
        let outcome = fetch_with_retry(self.fetcher.as_ref(), source, &self.config.retry).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        if !outcome.success() {
            warn!(
                source = %source.name,
                attempts = outcome.attempts,
                "Collection failed, moving to next source"
            );
            self.stats.record(Observation {
                timestamp: Utc::now(),
                source: source.name.clone(),
                success: false,
                response_time_ms,
                quality_score: 0.0,
            });
            return;
        }

        let freshness_window = chrono::Duration::days(self.config.freshness_window_days);
        let quality = compute_quality(&outcome.records, freshness_window);

        let verdicts = self.classifier.classify(&numeric_features(&outcome.records));
        let fetched = outcome.records.len();
        let kept: Vec<_> = outcome
            .records
            .into_iter()
            .zip(verdicts)
            .filter_map(|(record, keep)| keep.then_some(record.fields))
            .collect();
        if kept.len() < fetched {
            debug!(
                source = %source.name,
                dropped = fetched - kept.len(),
                "Anomaly gate dropped records"
            );
        }

        self.stats.record(Observation {
            timestamp: Utc::now(),
            source: source.name.clone(),
            success: true,
            response_time_ms,
            quality_score: quality.score(),
        });

        // Nothing survived the fetch and the gate; nothing to forward.
        if kept.is_empty() {
            info!(source = %source.name, fetched, "No records to forward");
            return;
        }

        info!(
            source = %source.name,
            fetched,
            forwarded = kept.len(),
            quality = format!("{:.2}", quality.score()),
            "Collected source"
        );
        ctx.send(
            &self.processor_id,
            MessagePayload::NewData {
                source: source.name.clone(),
                records: kept,
                quality,
            },
        );
    }
}

#[async_trait]
impl Agent for CollectorAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn initialize(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        info!(sources = self.config.sources.len(), "Collector initialized");
        Ok(())
    }

    async fn process(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError> {
        self.cycles += 1;
        let sources = self.config.sources.clone();
        for source in &sources {
            if self.should_collect(source) {
                self.collect_source(ctx, source).await;
            }
        }
        ctx.set_internal("cycles", json!(self.cycles)).await;
        ctx.set_internal("observations", json!(self.stats.total_observations()))
            .await;
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        for source in &self.config.sources {
            info!(
                source = %source.name,
                observations = self.stats.history(&source.name).len(),
                failures = self.stats.failures(&source.name),
                "Collector summary"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::RwLock;

    use crate::agents::agent::AgentState;
    use crate::agents::mailbox::{Mailbox, MailboxRouter, MessagePayload};
    use crate::collect::anomaly::IqrClassifier;
    use crate::models::CollectionRecord;

    struct StaticFetcher {
        rows: Vec<Value>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, source: &SourceConfig) -> Result<Vec<CollectionRecord>, PulseError> {
            Ok(self
                .rows
                .iter()
                .map(|row| {
                    let Value::Object(fields) = row.clone() else {
                        panic!("rows must be objects")
                    };
                    CollectionRecord {
                        source: source.name.clone(),
                        fields,
                        collected_at: Utc::now(),
                    }
                })
                .collect())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl SourceFetcher for FailingFetcher {
        async fn fetch(&self, _source: &SourceConfig) -> Result<Vec<CollectionRecord>, PulseError> {
            Err(PulseError::Http { status: 500 })
        }
    }

    struct NeverPredictor;

    impl SchedulePredictor for NeverPredictor {
        fn predict(&self, _history: &[Observation]) -> HashMap<u32, f64> {
            (0..24).map(|h| (h, 0.0)).collect()
        }
    }

    struct NoPredictor;

    impl SchedulePredictor for NoPredictor {
        fn predict(&self, _history: &[Observation]) -> HashMap<u32, f64> {
            HashMap::new()
        }
    }

    fn crime_source() -> SourceConfig {
        SourceConfig {
            name: "crime".into(),
            url: "http://localhost/crime".into(),
            params: HashMap::new(),
            auth_header: None,
            auth_token_env: None,
            max_records: 50,
        }
    }

    fn harness(
        fetcher: Arc<dyn SourceFetcher>,
        predictor: Arc<dyn SchedulePredictor>,
    ) -> (CollectorAgent, AgentContext, Mailbox) {
        let identity = AgentIdentity::new("collector", "Data Collector");
        let config = CollectorConfig {
            sources: vec![crime_source()],
            ..CollectorConfig::default()
        };
        let agent = CollectorAgent::new(
            identity.clone(),
            config,
            fetcher,
            Arc::new(IqrClassifier::default()),
            predictor,
            "processor",
        );

        let router = MailboxRouter::new();
        let processor_box = Mailbox::new();
        router.register("processor", processor_box.sender());
        let ctx = AgentContext::new(
            identity,
            Mailbox::new(),
            router,
            Arc::new(RwLock::new(AgentState::new())),
        );
        (agent, ctx, processor_box)
    }

    #[tokio::test]
    async fn test_successful_cycle_forwards_new_data() {
        let fetcher = Arc::new(StaticFetcher {
            rows: vec![serde_json::json!({"neighborhood": "Mission", "total_crimes": 12})],
        });
        let (mut agent, mut ctx, mut processor_box) = harness(fetcher, Arc::new(NoPredictor));

        agent.process(&mut ctx).await.unwrap();

        let messages = processor_box.drain();
        assert_eq!(messages.len(), 1);
        let MessagePayload::NewData {
            source,
            records,
            quality,
        } = &messages[0].payload
        else {
            panic!("expected new_data");
        };
        assert_eq!(source, "crime");
        assert_eq!(records.len(), 1);
        assert!(quality.score() > 0.0);
    }

    #[tokio::test]
    async fn test_failed_source_forwards_nothing_but_cycle_completes() {
        let (mut agent, mut ctx, mut processor_box) =
            harness(Arc::new(FailingFetcher), Arc::new(NoPredictor));

        agent.process(&mut ctx).await.unwrap();

        assert!(processor_box.drain().is_empty());
        assert_eq!(agent.stats.failures("crime"), 1);
    }

    #[tokio::test]
    async fn test_low_prediction_skips_source() {
        let fetcher = Arc::new(StaticFetcher {
            rows: vec![serde_json::json!({"x": 1})],
        });
        let (mut agent, mut ctx, mut processor_box) = harness(fetcher, Arc::new(NeverPredictor));

        agent.process(&mut ctx).await.unwrap();

        assert!(processor_box.drain().is_empty());
        // Skipped sources record no observation at all.
        assert_eq!(agent.stats.total_observations(), 0);
    }

    #[tokio::test]
    async fn test_empty_fetch_records_observation_but_forwards_nothing() {
        let (mut agent, mut ctx, mut processor_box) =
            harness(Arc::new(StaticFetcher { rows: Vec::new() }), Arc::new(NoPredictor));

        agent.process(&mut ctx).await.unwrap();

        assert!(processor_box.drain().is_empty());
        // The cycle still counts as a successful observation.
        assert_eq!(agent.stats.total_observations(), 1);
        assert_eq!(agent.stats.failures("crime"), 0);
    }

    #[tokio::test]
    async fn test_anomalous_records_dropped_before_forwarding() {
        let mut rows: Vec<Value> = (0..10)
            .map(|i| serde_json::json!({"total_crimes": i}))
            .collect();
        rows.push(serde_json::json!({"total_crimes": 100_000}));
        let (mut agent, mut ctx, mut processor_box) =
            harness(Arc::new(StaticFetcher { rows }), Arc::new(NoPredictor));

        agent.process(&mut ctx).await.unwrap();

        let messages = processor_box.drain();
        let MessagePayload::NewData { records, .. } = &messages[0].payload else {
            panic!("expected new_data");
        };
        assert_eq!(records.len(), 10);
    }
}
