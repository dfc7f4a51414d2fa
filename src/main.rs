use anyhow::Context;
use clap::Parser;
use metric_ingest::config::Settings;
use metric_ingest::consumer::{
    build_sink, join_workers, BatchPipeline, KafkaBatchSource, PipelineControl, PipelineMetrics,
    PipelineRunner,
};
use metric_ingest::normalize::NormalizationCache;
use metric_ingest::service::ControlService;
use metric_ingest::telemetry::init_tracing;
use metric_ingest::warehouse::{BatchWriter, BigQueryClient};
use metric_ingest::IngestError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "metric-ingest")]
#[command(about = "Stream device metrics from Kafka into BigQuery", long_about = None)]
struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "config/ingest.yaml")]
    config: PathBuf,

    /// Override the log filter with `debug`
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.debug {
        settings.logging.filter = "debug".to_string();
    }
    init_tracing(&settings.logging)?;
    info!("Loaded settings from {}", cli.config.display());

    let metrics = Arc::new(PipelineMetrics::new().map_err(IngestError::from)?);

    let client = Arc::new(
        BigQueryClient::new(settings.warehouse.clone())
            .map_err(|e| IngestError::Warehouse(e.to_string()))?,
    );
    let cache = NormalizationCache::load(client.as_ref())
        .await
        .map_err(IngestError::from)?;
    if cache.is_empty() {
        warn!("Normalization table is empty; metric names pass through unchanged");
    }

    let dead_letter = build_sink(&settings.dead_letter).map_err(IngestError::from)?;
    let writer = BatchWriter::new(client, settings.pipeline.retry.clone());
    let pipeline = BatchPipeline::new(Arc::new(cache), writer, dead_letter, metrics.clone())
        .with_chunk_size(settings.pipeline.chunk_size);

    let control = Arc::new(PipelineControl::new(
        metrics,
        settings.pipeline.start_running,
    ));

    let sources = KafkaBatchSource::connect_all(&settings.kafka)
        .await
        .map_err(IngestError::from)?;
    let workers = PipelineRunner::new(sources, Arc::new(pipeline), control.clone()).spawn();

    let addr = settings.service.socket_addr()?;
    let service = ControlService::with_settings(control.clone(), &settings.service);
    let mut shutdown_rx = control.subscribe().shutdown;
    let server = tokio::spawn(service.serve(addr, async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Ctrl-C received, shutting down");

    control.shutdown();
    let timeout = settings.pipeline.shutdown_timeout();
    if let Err(e) = control.wait_for_idle(timeout).await {
        warn!("{}", e);
    }
    join_workers(workers, timeout).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Control service failed: {}", e),
        Err(e) => error!("Control service task panicked: {}", e),
    }

    let snapshot = control.metrics().snapshot();
    info!(
        "Shutdown complete: {} consumed, {} pushed, {} quarantined, {} lost",
        snapshot.consumed, snapshot.pushed, snapshot.quarantined, snapshot.lost
    );
    Ok(())
}
