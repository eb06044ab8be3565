use async_trait::async_trait;
use enrich_core::config::EnrichmentConf;
use enrich_core::Enrichment;
use enrich_registry::{asset_local_path, RegistryBuilder};
use std::path::PathBuf;
use std::sync::Arc;

/// Ties the concrete built-in enrichments in `enrich-pipeline` to the
/// asset-backed registry in `enrich-registry`, without either crate
/// depending on the other (§4.3's "construction from configs" contract).
pub struct BuiltinRegistryBuilder {
    cache_dir: PathBuf,
}

impl BuiltinRegistryBuilder {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

#[async_trait]
impl RegistryBuilder for BuiltinRegistryBuilder {
    async fn build(&self, configs: &[EnrichmentConf]) -> anyhow::Result<Vec<Arc<dyn Enrichment>>> {
        let mut enrichments = Vec::with_capacity(configs.len());
        for conf in configs.iter().filter(|c| c.enabled) {
            let asset_path = match &conf.kind {
                enrich_core::config::EnrichmentKind::GeoIp { database_uri, .. } => {
                    Some(asset_local_path(&self.cache_dir, database_uri))
                }
                _ => None,
            };
            let enrichment = enrich_pipeline::enrichments::build(conf, asset_path)
                .map_err(|e| anyhow::anyhow!("building enrichment '{}': {e}", conf.id))?;
            enrichments.push(enrichment);
        }
        Ok(enrichments)
    }
}
