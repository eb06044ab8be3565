use crate::{EnrichmentRegistry, PauseGate, Registry};
use async_trait::async_trait;
use enrich_core::Enrichment;
use enrich_core::config::EnrichmentConf;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// `(local_path, last_fetched_at, content_hash)` for one declared asset URI
/// (§3 "AssetState"). Owned exclusively by [`AssetManager`].
#[derive(Debug, Clone)]
pub struct AssetState {
    pub uri: String,
    pub local_path: PathBuf,
    pub last_fetched_at: Option<chrono::DateTime<chrono::Utc>>,
    pub content_hash: Option<String>,
}

/// Builds a fresh [`Registry`] from configs against already-downloaded
/// asset files. Implemented by the crate that owns the concrete enrichment
/// types ([`enrich-pipeline`]) so `enrich-registry` never depends on them —
/// it only depends on the [`enrich_core::Enrichment`] trait.
#[async_trait]
pub trait RegistryBuilder: Send + Sync {
    async fn build(&self, configs: &[EnrichmentConf]) -> anyhow::Result<Vec<Arc<dyn Enrichment>>>;
}

/// Fetches a single URI (HTTP, in these tests also `file://`) and reports
/// its content hash so the [`AssetManager`] can decide whether it changed.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Conditionally fetch: returns `None` if the remote hash matches
    /// `known_hash` (HEAD + hash compare), `Some(bytes)` otherwise.
    async fn fetch_if_changed(&self, uri: &str, known_hash: Option<&str>) -> anyhow::Result<Option<Vec<u8>>>;
}

pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAssetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch_if_changed(&self, uri: &str, known_hash: Option<&str>) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(path) = uri.strip_prefix("file://") {
            let bytes = tokio::fs::read(path).await?;
            let hash = hash_bytes(&bytes);
            if Some(hash.as_str()) == known_hash {
                return Ok(None);
            }
            return Ok(Some(bytes));
        }
        let resp = self.client.get(uri).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?.to_vec();
        let hash = hash_bytes(&bytes);
        if Some(hash.as_str()) == known_hash {
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Deterministic local path for a remote asset URI, keyed by a hash of the
/// URI itself (§6 "Persisted state").
pub fn asset_local_path(cache_dir: &Path, uri: &str) -> PathBuf {
    cache_dir.join(hash_bytes(uri.as_bytes()))
}

/// Periodic loop that re-downloads remote asset files declared by
/// enrichments and atomically swaps the registry once all changed assets
/// land (§4.4). Inert (never runs its loop body) if `period` is `None`.
pub struct AssetManager {
    cache_dir: PathBuf,
    period: Option<Duration>,
    fetcher: Arc<dyn AssetFetcher>,
    builder: Arc<dyn RegistryBuilder>,
    registry: Arc<EnrichmentRegistry>,
    gate: Arc<PauseGate>,
    states: HashMap<String, AssetState>,
}

impl AssetManager {
    pub fn new(
        cache_dir: PathBuf,
        period: Option<Duration>,
        fetcher: Arc<dyn AssetFetcher>,
        builder: Arc<dyn RegistryBuilder>,
        registry: Arc<EnrichmentRegistry>,
        gate: Arc<PauseGate>,
    ) -> Self {
        Self {
            cache_dir,
            period,
            fetcher,
            builder,
            registry,
            gate,
            states: HashMap::new(),
        }
    }

    /// Download every declared asset and build the first registry, then
    /// open the gate. Called once at startup; failure here is fatal (§4.3,
    /// §7 item 8).
    pub async fn initial_build(&mut self, configs: &[EnrichmentConf]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        for uri in asset_uris(configs) {
            self.fetch_one(&uri).await?;
        }
        let enrichments = self.builder.build(configs).await?;
        self.registry
            .swap(Arc::new(Registry::new(configs.to_vec(), enrichments)));
        self.gate.open();
        Ok(())
    }

    async fn fetch_one(&mut self, uri: &str) -> anyhow::Result<bool> {
        let local_path = asset_local_path(&self.cache_dir, uri);
        let known_hash = self.states.get(uri).and_then(|s| s.content_hash.clone());
        match self.fetcher.fetch_if_changed(uri, known_hash.as_deref()).await {
            Ok(Some(bytes)) => {
                let tmp_path = local_path.with_extension("tmp");
                tokio::fs::write(&tmp_path, &bytes).await?;
                tokio::fs::rename(&tmp_path, &local_path).await?;
                let hash = hash_bytes(&bytes);
                self.states.insert(
                    uri.to_string(),
                    AssetState {
                        uri: uri.to_string(),
                        local_path,
                        last_fetched_at: Some(chrono::Utc::now()),
                        content_hash: Some(hash),
                    },
                );
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run the refresh loop until `cancel` fires. No-op forever if
    /// `period` was never configured.
    pub async fn run(&mut self, configs: Vec<EnrichmentConf>, cancel: tokio_util::sync::CancellationToken) {
        let Some(period) = self.period else {
            info!("assetsUpdatePeriod not set; asset manager is inert");
            return;
        };
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick fires immediately; skip it, initial_build already ran
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.refresh_cycle(&configs).await {
                        error!(error = %e, "asset refresh cycle failed; keeping previous registry");
                        metrics::counter!("enrich_asset_refresh_failures_total").increment(1);
                    }
                }
            }
        }
    }

    /// One refresh attempt (§4.4 steps 1-4). Downloads changed assets to
    /// temp paths first so a failed download never disturbs the live
    /// files; only renames onto the live paths after the pipeline has
    /// drained.
    async fn refresh_cycle(&mut self, configs: &[EnrichmentConf]) -> anyhow::Result<()> {
        metrics::counter!("enrich_asset_refresh_attempts_total").increment(1);
        let uris = asset_uris(configs);
        let mut changed_uris = Vec::new();
        let mut staged = HashMap::new();
        for uri in &uris {
            let local_path = asset_local_path(&self.cache_dir, uri);
            let known_hash = self.states.get(uri).and_then(|s| s.content_hash.clone());
            match self.fetcher.fetch_if_changed(uri, known_hash.as_deref()).await {
                Ok(Some(bytes)) => {
                    let tmp_path = local_path.with_extension("tmp");
                    tokio::fs::write(&tmp_path, &bytes).await?;
                    staged.insert(uri.clone(), (tmp_path, local_path, hash_bytes(&bytes)));
                    changed_uris.push(uri.clone());
                }
                Ok(None) => {}
                Err(e) => {
                    for (tmp_path, _, _) in staged.values() {
                        let _ = tokio::fs::remove_file(tmp_path).await;
                    }
                    return Err(e);
                }
            }
        }

        if changed_uris.is_empty() {
            return Ok(());
        }

        info!(changed = changed_uris.len(), "asset change detected; pausing pipeline for swap");
        self.gate.close();
        self.drain().await;

        let swap_result = self.apply_staged(configs, staged).await;
        self.gate.open();

        swap_result?;
        metrics::counter!("enrich_registry_swaps_total").increment(1);
        Ok(())
    }

    /// Wait (bounded) until the in-flight pipeline drains. A bound keeps a
    /// stuck enrichment from wedging the asset manager forever; that event
    /// still finishes on its own enrichment-level timeout (§5).
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while self.registry.in_flight_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("asset manager drain timed out; proceeding with swap anyway");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn apply_staged(
        &mut self,
        configs: &[EnrichmentConf],
        staged: HashMap<String, (PathBuf, PathBuf, String)>,
    ) -> anyhow::Result<()> {
        let mut applied = Vec::new();
        let result: anyhow::Result<()> = async {
            for (uri, (tmp_path, local_path, hash)) in &staged {
                tokio::fs::rename(tmp_path, local_path).await?;
                applied.push(uri.clone());
                self.states.insert(
                    uri.clone(),
                    AssetState {
                        uri: uri.clone(),
                        local_path: local_path.clone(),
                        last_fetched_at: Some(chrono::Utc::now()),
                        content_hash: Some(hash.clone()),
                    },
                );
            }
            let enrichments = self.builder.build(configs).await?;
            self.registry
                .swap(Arc::new(Registry::new(configs.to_vec(), enrichments)));
            Ok(())
        }
        .await;

        if result.is_err() {
            // All-or-nothing (§4.4 step 4, open question 3): a failure
            // partway through means we've already renamed some files onto
            // their live paths; there is nothing safe to "undo" them to
            // since the old bytes were overwritten, so the best available
            // recovery is keeping the old Registry (never swapped) and
            // surfacing the error for the next attempt to retry.
            for uri in &applied {
                warn!(uri, "asset renamed but registry rebuild failed; file is ahead of the active registry");
            }
        }
        result
    }
}

fn asset_uris(configs: &[EnrichmentConf]) -> Vec<String> {
    use enrich_core::config::EnrichmentKind;
    configs
        .iter()
        .filter(|c| c.enabled)
        .filter_map(|c| match &c.kind {
            EnrichmentKind::GeoIp { database_uri, .. } => Some(database_uri.clone()),
            _ => None,
        })
        .collect()
}
