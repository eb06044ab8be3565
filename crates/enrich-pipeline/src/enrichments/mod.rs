//! Built-in `Enrichment` implementations (§1, §3).
//!
//! The core's `Enrichment` trait treats individual enrichment kinds as an
//! external concern; these five are the reference set the runtime ships
//! with, each declared via [`enrich_core::config::EnrichmentKind`] and built
//! by [`build`].

mod api_request;
mod geo_ip;
mod javascript;
mod sql_query;
mod yauaa;

pub use api_request::ApiRequestEnrichment;
pub use geo_ip::GeoIpEnrichment;
pub use javascript::JavascriptEnrichment;
pub use sql_query::SqlQueryEnrichment;
pub use yauaa::YauaaEnrichment;

use enrich_core::config::{EnrichmentConf, EnrichmentKind};
use enrich_core::Enrichment;
use std::path::PathBuf;
use std::sync::Arc;

/// Instantiate the concrete enrichment behind one enabled [`EnrichmentConf`].
///
/// Asset-backed kinds (currently only `GeoIp`) are handed the local path the
/// caller resolved via the registry's asset manager; everything else is
/// self-contained.
pub fn build(conf: &EnrichmentConf, asset_path: Option<PathBuf>) -> anyhow::Result<Arc<dyn Enrichment>> {
    let enrichment: Arc<dyn Enrichment> = match &conf.kind {
        EnrichmentKind::ApiRequest { endpoint, timeout_ms } => Arc::new(ApiRequestEnrichment::new(
            conf.id.clone(),
            endpoint.clone(),
            timeout_ms.map(std::time::Duration::from_millis).unwrap_or(std::time::Duration::from_secs(5)),
        )),
        EnrichmentKind::SqlQuery { connection_string, query } => {
            Arc::new(SqlQueryEnrichment::new(conf.id.clone(), connection_string.clone(), query.clone()))
        }
        EnrichmentKind::Yauaa { cache_size } => {
            Arc::new(YauaaEnrichment::new(conf.id.clone(), cache_size.unwrap_or(10_000)))
        }
        EnrichmentKind::Javascript { script } => Arc::new(JavascriptEnrichment::new(conf.id.clone(), script.clone())),
        EnrichmentKind::GeoIp { database_uri, .. } => {
            let path = asset_path.ok_or_else(|| {
                anyhow::anyhow!("geo_ip enrichment '{}' has no resolved local asset path", conf.id)
            })?;
            Arc::new(GeoIpEnrichment::new(conf.id.clone(), database_uri.clone(), path))
        }
    };
    Ok(enrichment)
}
