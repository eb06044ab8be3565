use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the enrichment runtime (§6 "CLI (minimal)").
#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(about = "Streaming event-enrichment engine")]
#[command(long_about = "
Consumes partitioned collector payloads, decodes them into raw events, runs
a configurable enrichment pipeline, validates against a schema registry, and
routes each result to the good, pii, or bad sink.

Examples:
  enrich --config enrich.yml --iglu schemas.json
  ACCEPT_LIMITED_USE_LICENSE=1 enrich --config enrich.yml
  enrich --config enrich.yml --validate-config
")]
pub struct Args {
    /// Path to the process configuration file.
    #[arg(long)]
    pub config: PathBuf,

    /// Path to a static schema table consulted by the schema validator in
    /// place of a live Iglu registry (§1, §6 "Schema resolver").
    #[arg(long)]
    pub iglu: Option<PathBuf>,

    /// Parse and validate the configuration, then exit without starting
    /// the runtime. Exit code mirrors normal startup: 0 valid, 1 invalid.
    #[arg(long)]
    pub validate_config: bool,

    /// Directory enrichment assets are cached under (§6 "Persisted state").
    #[arg(long, default_value = "./enrich-assets")]
    pub asset_cache_dir: PathBuf,

    /// Grace period before a second shutdown signal forces termination.
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace_secs: u64,
}
