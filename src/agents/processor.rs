//! Validates, deduplicates, versions, and forwards incoming batches, and
//! periodically rebuilds the cross-source merged view.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::agent::{Agent, AgentContext, AgentIdentity};
use super::mailbox::MessagePayload;
use crate::config::ProcessorConfig;
use crate::errors::{with_retry, PulseError, RetryPolicy};
use crate::models::{QualityMetrics, Record, VersionedBatch};
use crate::process::merge::merge_batches;
use crate::process::schema::SchemaRegistry;
use crate::process::versioning::VersionStore;

pub struct ProcessorAgent {
    identity: AgentIdentity,
    config: ProcessorConfig,
    registry: SchemaRegistry,
    store: VersionStore,
    analyzer_id: String,
    /// Most recent batch per source, feeding the merged view.
    latest: HashMap<String, VersionedBatch>,
    cycles: u32,
    batches_persisted: u64,
}

impl ProcessorAgent {
    pub fn new(
        identity: AgentIdentity,
        config: ProcessorConfig,
        registry: SchemaRegistry,
        store: VersionStore,
        analyzer_id: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            config,
            registry,
            store,
            analyzer_id: analyzer_id.into(),
            latest: HashMap::new(),
            cycles: 0,
            batches_persisted: 0,
        }
    }

    async fn handle_batch(
        &mut self,
        ctx: &AgentContext,
        source: String,
        records: Vec<Record>,
        quality: QualityMetrics,
    ) -> Result<(), PulseError> {
        let received = records.len();
        let (valid, dropped) = self.registry.validate_batch(&source, records);
        let deduped = dedup_records(valid);
        info!(
            source = %source,
            received,
            schema_dropped = dropped,
            kept = deduped.len(),
            quality = format!("{:.2}", quality.score()),
            "Processing batch"
        );

        let batch = VersionedBatch::new(source.clone(), deduped);
        // Storage hiccups are retryable; anything else surfaces at once.
        with_retry("persist_batch", &RetryPolicy::default(), || {
            self.store.persist(&batch)
        })
        .await?;
        self.batches_persisted += 1;

        let patterns = detect_patterns(&batch.records);
        ctx.send(
            &self.analyzer_id,
            MessagePayload::ProcessedData {
                source: source.clone(),
                records: batch.records.clone(),
                patterns,
            },
        );
        self.latest.insert(source, batch);
        Ok(())
    }

    async fn write_merged_view(&self) -> Result<(), PulseError> {
        if self.latest.is_empty() {
            return Ok(());
        }
        let mut batches: Vec<VersionedBatch> = self.latest.values().cloned().collect();
        batches.sort_by(|a, b| a.source.cmp(&b.source));
        let rows = merge_batches(&batches, &self.config.merge);
        self.store.write_merged(&rows).await?;
        Ok(())
    }
}

/// Exact duplicates within one batch collapse to a single record, first
/// occurrence kept. Keys sort on serialization, so field order in the
/// upstream payload does not defeat the comparison.
fn dedup_records(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(serde_json::to_string(r).unwrap_or_default()))
        .collect()
}

/// Dominant-value patterns: a non-numeric field where over half the batch
/// shares one value.
fn detect_patterns(records: &[Record]) -> Vec<String> {
    if records.len() < 2 {
        return Vec::new();
    }
    let mut counts: HashMap<&str, HashMap<String, usize>> = HashMap::new();
    for record in records {
        for (field, value) in record {
            let key = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            *counts.entry(field).or_default().entry(key).or_insert(0) += 1;
        }
    }
    let mut patterns: Vec<String> = counts
        .into_iter()
        .filter_map(|(field, values)| {
            let (value, count) = values.into_iter().max_by_key(|(_, c)| *c)?;
            (count * 2 > records.len()).then(|| format!("{field}={value}"))
        })
        .collect();
    patterns.sort();
    patterns
}

#[async_trait]
impl Agent for ProcessorAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn initialize(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        self.store.init().await?;
        // Pick up batches persisted by earlier runs so the merged view
        // covers every source on disk, not just ones seen since startup.
        for batch in self.store.load_all_latest().await? {
            self.latest.insert(batch.source.clone(), batch);
        }
        info!(
            out_dir = %self.store.out_dir().display(),
            known_sources = self.latest.len(),
            "Processor initialized"
        );
        Ok(())
    }

    async fn process(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError> {
        self.cycles += 1;
        for message in ctx.drain() {
            match message.payload {
                MessagePayload::NewData {
                    source,
                    records,
                    quality,
                } => {
                    // One bad batch never stops the rest of the queue.
                    if let Err(e) = self.handle_batch(ctx, source.clone(), records, quality).await {
                        warn!(source = %source, error = %e, "Failed to process batch");
                    }
                }
                other => {
                    warn!(
                        from = %message.from,
                        kind = other.kind(),
                        "Rejecting unexpected payload"
                    );
                }
            }
        }

        if self.config.merge_every > 0 && self.cycles % self.config.merge_every == 0 {
            if let Err(e) = self.write_merged_view().await {
                warn!(error = %e, "Failed to write merged view");
            }
        }

        ctx.set_internal("batches_persisted", json!(self.batches_persisted))
            .await;
        ctx.set_internal("sources_seen", json!(self.latest.len()))
            .await;
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        debug!(batches = self.batches_persisted, "Processor summary");
        self.write_merged_view().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use crate::agents::agent::AgentState;
    use crate::agents::mailbox::{Mailbox, MailboxRouter, Message};
    use crate::process::schema::{FieldType, SourceSchema};

    fn record(fields: serde_json::Value) -> Record {
        let serde_json::Value::Object(fields) = fields else {
            panic!("fields must be an object")
        };
        fields
    }

    fn harness(dir: &std::path::Path) -> (ProcessorAgent, AgentContext, Mailbox) {
        let identity = AgentIdentity::new("processor", "Data Processor");
        let mut registry = SchemaRegistry::default();
        registry.insert(
            "crime",
            SourceSchema {
                required: vec!["neighborhood".into()],
                field_types: std::collections::HashMap::from([(
                    "total_crimes".to_string(),
                    FieldType::Integer,
                )]),
            },
        );
        let agent = ProcessorAgent::new(
            identity.clone(),
            ProcessorConfig::default(),
            registry,
            VersionStore::new(dir),
            "analyzer",
        );

        let router = MailboxRouter::new();
        let mailbox = Mailbox::new();
        router.register("processor", mailbox.sender());
        let analyzer_box = Mailbox::new();
        router.register("analyzer", analyzer_box.sender());
        let ctx = AgentContext::new(
            identity,
            mailbox,
            router,
            Arc::new(RwLock::new(AgentState::new())),
        );
        (agent, ctx, analyzer_box)
    }

    fn new_data(source: &str, rows: Vec<serde_json::Value>) -> MessagePayload {
        MessagePayload::NewData {
            source: source.into(),
            records: rows.into_iter().map(record).collect(),
            quality: QualityMetrics::default(),
        }
    }

    #[tokio::test]
    async fn test_batch_is_versioned_and_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, mut ctx, mut analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();

        ctx.send(
            "processor",
            new_data("crime", vec![serde_json::json!({"neighborhood": "Mission", "total_crimes": 3})]),
        );
        agent.process(&mut ctx).await.unwrap();

        let stored = agent.store.load_latest("crime").await.unwrap().unwrap();
        assert_eq!(stored.records.len(), 1);

        let messages = analyzer_box.drain();
        assert_eq!(messages.len(), 1);
        let MessagePayload::ProcessedData { source, records, .. } = &messages[0].payload else {
            panic!("expected processed_data");
        };
        assert_eq!(source, "crime");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_within_batch_duplicates_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, mut ctx, _analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();

        let row = serde_json::json!({"neighborhood": "Mission", "total_crimes": 3});
        ctx.send("processor", new_data("crime", vec![row.clone(), row]));
        agent.process(&mut ctx).await.unwrap();

        let stored = agent.store.load_latest("crime").await.unwrap().unwrap();
        assert_eq!(stored.records.len(), 1);
    }

    #[tokio::test]
    async fn test_schema_violations_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, mut ctx, mut analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();

        ctx.send(
            "processor",
            new_data(
                "crime",
                vec![
                    serde_json::json!({"neighborhood": "Mission", "total_crimes": 3}),
                    serde_json::json!({"total_crimes": 9}),
                ],
            ),
        );
        agent.process(&mut ctx).await.unwrap();

        let messages = analyzer_box.drain();
        let MessagePayload::ProcessedData { records, .. } = &messages[0].payload else {
            panic!("expected processed_data");
        };
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, mut ctx, mut analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();

        ctx.send(
            "processor",
            MessagePayload::AnalysisResult {
                source: "crime".into(),
                report: Default::default(),
                insights: Vec::new(),
            },
        );
        agent.process(&mut ctx).await.unwrap();

        assert!(analyzer_box.drain().is_empty());
        assert!(agent.store.load_latest("crime").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merged_view_written_after_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, mut ctx, _analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();

        ctx.send(
            "processor",
            new_data("crime", vec![serde_json::json!({"neighborhood": "Mission", "total_crimes": 3})]),
        );
        ctx.send(
            "processor",
            new_data("reviews", vec![serde_json::json!({"neighborhood": "Mission", "rating": 4.5})]),
        );
        agent.process(&mut ctx).await.unwrap();

        let merged: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("merged_"))
            .collect();
        assert_eq!(merged.len(), 1);
        let rows: Vec<Record> =
            serde_json::from_slice(&std::fs::read(merged[0].path()).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["total_crimes"], serde_json::json!(3));
        assert_eq!(rows[0]["rating"], serde_json::json!(4.5));
    }

    #[tokio::test]
    async fn test_restart_keeps_persisted_sources_in_merged_view() {
        let dir = tempfile::tempdir().unwrap();

        // First run persists a crime batch, then goes away.
        let (mut agent, mut ctx, _analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();
        ctx.send(
            "processor",
            new_data("crime", vec![serde_json::json!({"neighborhood": "Mission", "total_crimes": 3})]),
        );
        agent.process(&mut ctx).await.unwrap();
        drop(agent);

        // A fresh processor over the same directory sees the old source.
        let (mut agent, mut ctx, _analyzer_box) = harness(dir.path());
        agent.initialize(&mut ctx).await.unwrap();
        ctx.send(
            "processor",
            new_data("reviews", vec![serde_json::json!({"neighborhood": "Mission", "rating": 4.5})]),
        );
        agent.process(&mut ctx).await.unwrap();

        let mut merged: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("merged_"))
            .collect();
        merged.sort_by_key(|e| e.file_name());
        let newest = merged.last().unwrap();
        let rows: Vec<Record> =
            serde_json::from_slice(&std::fs::read(newest.path()).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["total_crimes"], serde_json::json!(3));
        assert_eq!(rows[0]["rating"], serde_json::json!(4.5));
    }

    #[test]
    fn test_dominant_value_patterns() {
        let records: Vec<Record> = vec![
            record(serde_json::json!({"category": "residential", "price": 1})),
            record(serde_json::json!({"category": "residential", "price": 2})),
            record(serde_json::json!({"category": "commercial", "price": 3})),
        ];
        let patterns = detect_patterns(&records);
        assert_eq!(patterns, vec!["category=residential"]);
    }
}
