use async_trait::async_trait;
use enrich_core::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
use enrich_model::{EnrichedEvent, RawEvent, SelfDescribingJson};
use std::collections::HashMap;
use std::path::PathBuf;

const GEO_IP_CONTEXT_SCHEMA: &str = "iglu:com.enrich/geo_ip_context/jsonschema/1-0-0";

/// IP-to-geography lookup backed by the asset the registry swaps in.
///
/// A real MaxMind/GeoIP2 binary database is mmap-sensitive reference data
/// (§4.4, §4.5); this crate's scope is the enrichment contract and the
/// swap discipline rather than a binary-format reader, so the on-disk
/// format here is a flat `ip,country,city` CSV documented in `DESIGN.md`.
/// The registry rebuilds a fresh instance (reading `local_path` anew) on
/// every asset swap rather than mutating one in place, so there is no
/// reload-after-construction path here.
pub struct GeoIpEnrichment {
    id: String,
    database_uri: String,
    table: HashMap<String, (String, String)>,
}

impl GeoIpEnrichment {
    pub fn new(id: String, database_uri: String, local_path: PathBuf) -> Self {
        let table = load_table(&local_path).unwrap_or_default();
        Self { id, database_uri, table }
    }

    pub fn database_uri(&self) -> &str {
        &self.database_uri
    }
}

fn load_table(path: &PathBuf) -> anyhow::Result<HashMap<String, (String, String)>> {
    let text = std::fs::read_to_string(path)?;
    let mut table = HashMap::new();
    for line in text.lines() {
        let mut fields = line.splitn(3, ',');
        let (Some(ip), Some(country), Some(city)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        table.insert(ip.to_string(), (country.to_string(), city.to_string()));
    }
    Ok(table)
}

#[async_trait]
impl Enrichment for GeoIpEnrichment {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, raw: &RawEvent, _partial: &EnrichedEvent) -> Result<EnrichmentOutcome, EnrichmentFailure> {
        let Some(ip) = raw.ip_address.as_deref() else {
            return Ok(EnrichmentOutcome::empty());
        };

        let Some((country, city)) = self.table.get(ip) else {
            return Ok(EnrichmentOutcome::empty());
        };

        Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(
            GEO_IP_CONTEXT_SCHEMA,
            serde_json::json!({ "country": country, "city": city }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_ip(ip: &str) -> RawEvent {
        RawEvent {
            api_schema: "iglu:test/tp2".into(),
            parameters: HashMap::new(),
            collector_timestamp_ms: 0,
            collector: None,
            user_agent: None,
            ip_address: Some(ip.to_string()),
            referer_uri: None,
            hostname: None,
            network_user_id: None,
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn known_ip_produces_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.csv");
        std::fs::write(&path, "1.2.3.4,US,Seattle\n").unwrap();
        let enrichment = GeoIpEnrichment::new("geo_ip".into(), "file:///geo.mmdb".into(), path);

        let partial = EnrichedEvent::from_raw(&raw_with_ip("1.2.3.4"), "id".into());
        let outcome = enrichment.run(&raw_with_ip("1.2.3.4"), &partial).await.unwrap();
        assert_eq!(outcome.contexts.len(), 1);
        assert_eq!(outcome.contexts[0].data["country"], "US");
    }

    #[tokio::test]
    async fn unknown_ip_produces_no_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.csv");
        std::fs::write(&path, "1.2.3.4,US,Seattle\n").unwrap();
        let enrichment = GeoIpEnrichment::new("geo_ip".into(), "file:///geo.mmdb".into(), path);

        let partial = EnrichedEvent::from_raw(&raw_with_ip("9.9.9.9"), "id".into());
        let outcome = enrichment.run(&raw_with_ip("9.9.9.9"), &partial).await.unwrap();
        assert!(outcome.contexts.is_empty());
    }
}
