//! Process configuration (§6 "Config recognized options").
//!
//! HOCON itself is out of scope (§1 lists config-file parsing as an external
//! collaborator); this loader accepts YAML, the same shape the teacher's CLI
//! already parses pipeline specs with (`serde_yaml`), documented as a
//! substitution in `DESIGN.md`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn default_enrich_concurrency() -> usize {
    8
}

fn default_sink_concurrency() -> usize {
    4
}

fn default_max_record_size() -> usize {
    1_000_000
}

/// Top-level process configuration, loaded from `--config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: SourceDriverSpec,
    pub output: OutputSpec,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Refresh interval for enrichment assets; absent disables the
    /// [`AssetManager`](../../enrich_registry/struct.AssetManager.html) loop (§4.4).
    #[serde(default, with = "humantime_opt")]
    pub assets_update_period: Option<Duration>,

    #[serde(default)]
    pub feature_flags: FeatureFlags,

    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,

    #[serde(default)]
    pub enrichments: Vec<EnrichmentConf>,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub telemetry: HashMap<String, serde_json::Value>,

    /// Explicit acceptance of the limited-use license, satisfied either
    /// here or via `ACCEPT_LIMITED_USE_LICENSE=1` (§6).
    #[serde(default)]
    pub license: LicenseConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default)]
    pub accept: bool,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup-time structural validation (§7 item 8: bad config is fatal).
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.license_accepted() {
            anyhow::bail!(
                "license not accepted: set license.accept in config or ACCEPT_LIMITED_USE_LICENSE=1"
            );
        }
        if self.concurrency.enrich == 0 {
            anyhow::bail!("concurrency.enrich must be >= 1");
        }
        if self.concurrency.sink == 0 {
            anyhow::bail!("concurrency.sink must be >= 1");
        }
        let mut seen = std::collections::HashSet::new();
        for e in &self.enrichments {
            if !seen.insert(e.id.clone()) {
                anyhow::bail!("duplicate enrichment id: {}", e.id);
            }
        }
        Ok(())
    }

    pub fn license_accepted(&self) -> bool {
        self.license.accept || std::env::var("ACCEPT_LIMITED_USE_LICENSE").as_deref() == Ok("1")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_enrich_concurrency")]
    pub enrich: usize,
    #[serde(default = "default_sink_concurrency")]
    pub sink: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enrich: default_enrich_concurrency(),
            sink: default_sink_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub accept_invalid: bool,
    #[serde(default)]
    pub legacy_enrichment_order: bool,
    #[serde(default)]
    pub try_base64_decoding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDriverSpec {
    /// In-process channel source, used by tests and local development.
    Channel { id: String },
    /// Newline-delimited file source: one record per line.
    File { id: String, path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkDriverSpec {
    Channel { id: String },
    File { id: String, path: String },
    /// Discards writes after acking them; useful for throughput tests.
    Null { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub good: SinkDriverSpec,
    #[serde(default)]
    pub pii: Option<SinkDriverSpec>,
    pub bad: SinkDriverSpec,
}

/// Static configuration for one enrichment instance (type, parameters, and
/// the asset URIs/local paths/hashes it's declared against) — §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConf {
    pub id: String,
    #[serde(flatten)]
    pub kind: EnrichmentKind,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentKind {
    ApiRequest {
        endpoint: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    SqlQuery {
        connection_string: String,
        query: String,
    },
    Yauaa {
        #[serde(default)]
        cache_size: Option<usize>,
    },
    Javascript {
        script: String,
    },
    GeoIp {
        database_uri: String,
        #[serde(default)]
        local_path: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub metrics: Option<String>,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

mod humantime_opt {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_u64(d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
