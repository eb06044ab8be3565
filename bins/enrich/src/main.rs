//! # Enrich
//!
//! Entry point: parses CLI args, loads configuration, wires the source,
//! enrichment registry, pipeline, and sinks, then runs until shutdown
//! (§4.9, §6).

mod cli;
mod commit_sequencer;
mod registry_builder;
mod runtime;

use anyhow::Context;
use clap::Parser;
use cli::Args;
use commit_sequencer::CommitSequencer;
use enrich_core::config::{Config, MonitoringConfig, SinkDriverSpec, SourceDriverSpec};
use enrich_core::ByteSink;
use enrich_io::{ChannelCheckpointer, ChannelSink, ChannelSource, FileSink, FileSource, NullSink};
use enrich_pipeline::{EnrichmentPipeline, SchemaValidator, StaticResolver};
use enrich_registry::{AssetManager, EnrichmentRegistry, HttpAssetFetcher, PauseGate};
use registry_builder::BuiltinRegistryBuilder;
use runtime::Runtime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            std::process::ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<std::process::ExitCode> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "startup failed: invalid configuration");
            return Ok(std::process::ExitCode::from(1));
        }
    };

    if args.validate_config {
        info!("configuration is valid");
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let resolver = load_resolver(args.iglu.as_deref())?;
    let validator = Arc::new(SchemaValidator::new(resolver));

    let gate = Arc::new(PauseGate::new());
    let registry = Arc::new(EnrichmentRegistry::default());
    let builder = Arc::new(BuiltinRegistryBuilder::new(args.asset_cache_dir.clone()));
    let mut asset_manager = AssetManager::new(
        args.asset_cache_dir.clone(),
        config.assets_update_period,
        Arc::new(HttpAssetFetcher::new()),
        builder,
        registry.clone(),
        gate.clone(),
    );
    if let Err(e) = asset_manager.initial_build(&config.enrichments).await {
        tracing::error!(error = %e, "startup failed: initial enrichment asset build failed");
        return Ok(std::process::ExitCode::from(1));
    }

    install_metrics_recorder(&config.monitoring);

    let pipeline = Arc::new(EnrichmentPipeline::new(
        registry.clone(),
        gate.clone(),
        validator,
        config.feature_flags.clone(),
    ));

    let cancel = CancellationToken::new();
    let asset_cancel = cancel.child_token();
    let asset_configs = config.enrichments.clone();
    let asset_handle = tokio::spawn(async move { asset_manager.run(asset_configs, asset_cancel).await });

    let checkpointer = build_checkpointer(&config.input);
    let sequencer = Arc::new(CommitSequencer::new(checkpointer));

    let good_sink = build_attributed_sink(&config.output.good)?;
    let pii_sink = config.output.pii.as_ref().map(build_attributed_sink).transpose()?;
    let bad_sink = build_byte_sink(&config.output.bad)?;

    let runtime = Runtime {
        max_record_size: config.max_record_size,
        try_base64_decoding: config.feature_flags.try_base64_decoding,
        pipeline,
        good_sink,
        pii_sink,
        bad_sink,
        sequencer,
        enrich_concurrency: config.concurrency.enrich,
        sink_concurrency: config.concurrency.sink,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
    };

    let source = build_source(&config.input).await?;

    info!("Running Enrich");

    let run_cancel = cancel.clone();
    let run_handle = tokio::spawn(async move { runtime.run(source, run_cancel).await });

    let forced = wait_for_shutdown(cancel.clone(), Duration::from_secs(args.shutdown_grace_secs)).await;
    asset_cancel_and_join(asset_handle).await;

    if forced {
        tracing::error!("Enrich shutdown forced");
        return Ok(std::process::ExitCode::from(2));
    }

    match run_handle.await {
        Ok(Ok(())) => {
            info!("Enrich stopped");
            Ok(std::process::ExitCode::SUCCESS)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "runtime exited with error");
            Ok(std::process::ExitCode::from(2))
        }
        Err(e) => {
            tracing::error!(error = %e, "runtime task panicked");
            Ok(std::process::ExitCode::from(2))
        }
    }
}

async fn asset_cancel_and_join(handle: tokio::task::JoinHandle<()>) {
    if !handle.is_finished() {
        handle.abort();
    }
}

/// Awaits SIGTERM/Ctrl-C, cancels the runtime, then races a second signal
/// against the shutdown grace period. Returns `true` if shutdown was
/// forced (§4.9 "Shutdown").
async fn wait_for_shutdown(cancel: CancellationToken, grace: Duration) -> bool {
    wait_for_signal().await;
    cancel.cancel();
    tokio::select! {
        _ = wait_for_signal() => true,
        _ = tokio::time::sleep(grace) => {
            warn!("shutdown grace period elapsed");
            false
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn load_resolver(iglu_path: Option<&std::path::Path>) -> anyhow::Result<Box<StaticResolver>> {
    let Some(path) = iglu_path else {
        return Ok(Box::new(StaticResolver::empty()));
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let schemas: std::collections::HashMap<String, serde_json::Value> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Box::new(StaticResolver::new(schemas)))
}

async fn build_source(spec: &SourceDriverSpec) -> anyhow::Result<Box<dyn enrich_core::ByteRecordSource>> {
    match spec {
        SourceDriverSpec::Channel { id } => {
            let (_tx, rx) = mpsc::channel(1024);
            warn!(id, "channel source has no external feeder wired; it will read until the channel is dropped");
            Ok(Box::new(ChannelSource::new(id.clone(), rx)))
        }
        SourceDriverSpec::File { path, .. } => Ok(Box::new(FileSource::open(path).await?)),
    }
}

fn build_attributed_sink(spec: &SinkDriverSpec) -> anyhow::Result<Arc<dyn enrich_core::AttributedSink>> {
    match spec {
        SinkDriverSpec::Channel { .. } => {
            let (tx, _rx) = mpsc::channel(1024);
            Ok(Arc::new(ChannelSink::new(tx)))
        }
        SinkDriverSpec::File { path, .. } => Ok(Arc::new(FilePassthroughSink::new(path.clone()))),
        SinkDriverSpec::Null { .. } => Ok(Arc::new(NullSink::new())),
    }
}

fn build_byte_sink(spec: &SinkDriverSpec) -> anyhow::Result<Arc<dyn enrich_core::ByteSink>> {
    match spec {
        SinkDriverSpec::Channel { .. } => {
            let (tx, _rx) = mpsc::channel(1024);
            Ok(Arc::new(ChannelSink::new(tx)))
        }
        SinkDriverSpec::File { path, .. } => Ok(Arc::new(FileSink::new(path.clone()))),
        SinkDriverSpec::Null { .. } => Ok(Arc::new(NullSink::new())),
    }
}

fn build_checkpointer(_spec: &SourceDriverSpec) -> Arc<dyn enrich_core::Checkpointer> {
    Arc::new(ChannelCheckpointer::new())
}

/// Installs a global Prometheus recorder for the `metrics` macros used
/// throughout the pipeline and registry crates (§5) when `monitoring.metrics`
/// names the `prometheus` driver. Absent or unrecognized, counters still run
/// through the no-op recorder `metrics` installs by default.
fn install_metrics_recorder(monitoring: &MonitoringConfig) {
    if monitoring.metrics.as_deref() != Some("prometheus") {
        return;
    }
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        warn!(error = %e, "failed to install prometheus metrics recorder");
    }
}

/// Adapts [`FileSink`] (a `ByteSink`) behind `AttributedSink`, dropping
/// attributes: the line-delimited file format this crate ships has no
/// slot for out-of-band routing metadata.
struct FilePassthroughSink {
    inner: FileSink,
}

impl FilePassthroughSink {
    fn new(path: String) -> Self {
        Self {
            inner: FileSink::new(path),
        }
    }
}

#[async_trait::async_trait]
impl enrich_core::AttributedSink for FilePassthroughSink {
    async fn write(&self, bytes: Vec<u8>, _attributes: std::collections::HashMap<String, String>) -> anyhow::Result<enrich_core::Ack> {
        self.inner.write(bytes).await
    }
}
