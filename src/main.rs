use anyhow::Context;
use ccx_exporter::config::Config;
use ccx_exporter::entity::Event;
use ccx_exporter::pipeline::PipelineRunner;
use ccx_exporter::processing::{DeadLetterProcessor, EventProcessor};
use ccx_exporter::repo::{
    ParallelProjectionWriter, ProjectionWriter, S3DeadLetterWriter, S3ProjectionWriter,
    ValkeyHostStore,
};
use ccx_exporter::{factory, metrics, telemetry};
use clap::Parser;
use prometheus::Registry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process kafka events & push them to s3.
#[derive(Parser)]
#[command(name = "ccx-exporter", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Logging may not be up yet, so stderr is the safe sink here.
            eprintln!("ccx-exporter failed: {err:#}");

            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    telemetry::init_logging(&config.logs)?;
    info!(?config, "configuration loaded");

    let shutdown = CancellationToken::new();
    tokio::spawn(handle_signals(shutdown.clone()));

    let registry = Registry::new();

    // Backends
    let valkey = factory::create_valkey_client(&config.valkey).await?;
    let host_store = Arc::new(ValkeyHostStore::new(valkey, config.valkey.ttl));

    let mut writers: Vec<Arc<dyn ProjectionWriter>> = Vec::with_capacity(config.output.s3.len());
    for s3_conf in &config.output.s3 {
        let client = factory::create_s3_client(s3_conf).await;
        writers.push(Arc::new(S3ProjectionWriter::new(
            client,
            s3_conf.bucket.clone(),
            s3_conf.key_prefix.clone(),
        )));
    }

    anyhow::ensure!(!writers.is_empty(), "no s3 output configured");

    let projection_writer: Arc<dyn ProjectionWriter> = if writers.len() == 1 {
        writers.remove(0)
    } else {
        Arc::new(ParallelProjectionWriter::new(writers))
    };

    let dlq_client = factory::create_s3_client(&config.dead_letter_queue).await;
    let dead_letter_writer = Arc::new(S3DeadLetterWriter::new(
        dlq_client,
        config.dead_letter_queue.bucket.clone(),
        config.dead_letter_queue.key_prefix.clone(),
    ));

    // Pipelines
    let processing = factory::decorate_processing(
        EventProcessor::new(host_store, projection_writer),
        &registry,
        config.processing.retry.clone(),
        shutdown.clone(),
    )?;

    let error_processing = factory::decorate_error_processing(
        DeadLetterProcessor::new(dead_letter_writer),
        &registry,
        config.processing.retry.clone(),
        shutdown.clone(),
    )?;

    // Consumer
    let consumer = Arc::new(factory::create_kafka_consumer(&config.kafka)?);
    let runner = PipelineRunner::<Event>::new(
        consumer,
        processing,
        error_processing,
        shutdown.clone(),
    );

    let metrics_task = tokio::spawn(metrics::serve(
        config.metrics.port,
        registry.clone(),
        shutdown.clone(),
    ));

    let result = runner.run().await;

    // The consumer is done (shutdown or fatal error); release everything
    // else within the graceful budget.
    shutdown.cancel();

    match tokio::time::timeout(config.graceful_duration, metrics_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(error = %err, "metrics server failed"),
        Ok(Err(err)) => error!(error = %err, "metrics server task panicked"),
        Err(_) => warn!(
            budget = ?config.graceful_duration,
            "graceful shutdown budget exceeded",
        ),
    }

    result.context("consumer failed")
}

async fn handle_signals(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("signal received, shutting down");
    shutdown.cancel();

    wait_for_signal().await;
    warn!("second signal received, exiting immediately");
    std::process::exit(1);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler");

            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
