use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::agents::{
    AgentIdentity, AgentManager, AnalyzerAgent, CollectorAgent, ProcessorAgent, ANALYZER_ID,
    COLLECTOR_ID, PROCESSOR_ID,
};
use crate::analyze::StatsGenerator;
use crate::cli::commands::RunArgs;
use crate::collect::anomaly::IqrClassifier;
use crate::collect::fetch::HttpFetcher;
use crate::collect::schedule::HourlySuccessPredictor;
use crate::config::PipelineConfig;
use crate::errors::PulseError;
use crate::process::{SchemaRegistry, VersionStore};

pub async fn handle_run(args: RunArgs) -> Result<(), PulseError> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    config.validate()?;

    let run_id = Uuid::new_v4();
    info!(
        run_id = %run_id,
        sources = config.collector.sources.len(),
        output = %config.output_dir.display(),
        "Starting pipeline"
    );

    let manager = AgentManager::new(Duration::from_secs(config.manager.stop_grace_secs));

    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.collector.fetch_timeout_secs,
    ))?);
    let collector = CollectorAgent::new(
        AgentIdentity::new(COLLECTOR_ID, "Data Collector"),
        config.collector.clone(),
        fetcher,
        Arc::new(IqrClassifier::default()),
        Arc::new(HourlySuccessPredictor),
        PROCESSOR_ID,
    );

    let registry = match &config.processor.schema_file {
        Some(path) => SchemaRegistry::load(path)?,
        None => SchemaRegistry::default(),
    };
    let processor = ProcessorAgent::new(
        AgentIdentity::new(PROCESSOR_ID, "Data Processor"),
        config.processor.clone(),
        registry,
        VersionStore::new(&config.output_dir),
        ANALYZER_ID,
    );

    let analyzer = AnalyzerAgent::new(
        AgentIdentity::new(ANALYZER_ID, "Data Analyzer"),
        config.analyzer.clone(),
        Arc::new(StatsGenerator),
        &config.output_dir,
        None,
    );

    manager.register(Box::new(collector))?;
    manager.register(Box::new(processor))?;
    manager.register(Box::new(analyzer))?;
    manager.start_all()?;

    match args.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(duration_secs = secs, "Run duration elapsed");
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Interrupt received");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupt received");
        }
    }

    manager.stop_all().await;
    for status in manager.status_all().await {
        info!(agent = %status.name, lifecycle = %status.lifecycle, "Final status");
    }
    Ok(())
}
