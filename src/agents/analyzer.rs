//! Consumes processed batches, runs the statistical analysis, persists a
//! per-source result artifact, and forwards the summary downstream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::agent::{Agent, AgentContext, AgentIdentity};
use super::mailbox::MessagePayload;
use crate::analyze::insights::{generate_insights, InsightGenerator};
use crate::config::AnalyzerConfig;
use crate::errors::PulseError;
use crate::models::{AnalysisReport, Record};

/// Shape of the artifact written per analyzed batch.
#[derive(Debug, Serialize)]
struct AnalysisArtifact<'a> {
    source: &'a str,
    analyzed_at: chrono::DateTime<Utc>,
    record_count: usize,
    report: &'a AnalysisReport,
    insights: &'a [String],
}

pub struct AnalyzerAgent {
    identity: AgentIdentity,
    config: AnalyzerConfig,
    generator: Arc<dyn InsightGenerator>,
    out_dir: PathBuf,
    /// Optional consumer of `AnalysisResult` messages. None means the
    /// artifacts on disk are the terminal output.
    downstream: Option<String>,
    reports_written: u64,
}

impl AnalyzerAgent {
    pub fn new(
        identity: AgentIdentity,
        config: AnalyzerConfig,
        generator: Arc<dyn InsightGenerator>,
        out_dir: impl Into<PathBuf>,
        downstream: Option<String>,
    ) -> Self {
        Self {
            identity,
            config,
            generator,
            out_dir: out_dir.into(),
            downstream,
            reports_written: 0,
        }
    }

    fn analysis_dir(&self) -> PathBuf {
        self.out_dir.join("analysis")
    }

    async fn analyze_batch(
        &mut self,
        ctx: &AgentContext,
        source: &str,
        records: &[Record],
        patterns: &[String],
    ) -> Result<(), PulseError> {
        let report = self.generator.analyze(records)?;
        let insights = generate_insights(&report, patterns);

        let artifact = AnalysisArtifact {
            source,
            analyzed_at: Utc::now(),
            record_count: records.len(),
            report: &report,
            insights: &insights,
        };
        let stamp = artifact.analyzed_at.format("%Y%m%d_%H%M%S%3f");
        let path = self.analysis_dir().join(format!("{source}_{stamp}.json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&artifact)?).await?;
        self.reports_written += 1;
        info!(
            source,
            insights = insights.len(),
            path = %path.display(),
            "Wrote analysis artifact"
        );

        if let Some(downstream) = &self.downstream {
            ctx.send(
                downstream,
                MessagePayload::AnalysisResult {
                    source: source.to_string(),
                    report,
                    insights,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for AnalyzerAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn initialize(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        tokio::fs::create_dir_all(self.analysis_dir())
            .await
            .map_err(|e| {
                PulseError::Storage(format!(
                    "cannot create analysis directory {}: {}",
                    self.analysis_dir().display(),
                    e
                ))
            })?;
        Ok(())
    }

    async fn process(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError> {
        for message in ctx.drain() {
            match message.payload {
                MessagePayload::ProcessedData {
                    source,
                    records,
                    patterns,
                } => {
                    // Partial results for other sources still land.
                    if let Err(e) = self.analyze_batch(ctx, &source, &records, &patterns).await {
                        warn!(source = %source, error = %e, "Analysis failed");
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
        ctx.set_internal("reports_written", json!(self.reports_written))
            .await;
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
        info!(reports = self.reports_written, "Analyzer summary");
        Ok(())
    }
}
