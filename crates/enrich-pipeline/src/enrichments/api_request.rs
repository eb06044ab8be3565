use async_trait::async_trait;
use enrich_core::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
use enrich_model::{EnrichedEvent, RawEvent, SelfDescribingJson};
use std::time::Duration;

/// Looks up a context document from a configured HTTP endpoint keyed by the
/// event's user id, merging the response body in as a derived context.
pub struct ApiRequestEnrichment {
    id: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ApiRequestEnrichment {
    pub fn new(id: String, endpoint: String, timeout: Duration) -> Self {
        Self {
            id,
            endpoint,
            timeout,
            client: reqwest::Client::new(),
        }
    }

}

const API_REQUEST_CONTEXT_SCHEMA: &str = "iglu:com.enrich/api_request_context/jsonschema/1-0-0";

#[async_trait]
impl Enrichment for ApiRequestEnrichment {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, raw: &RawEvent, _partial: &EnrichedEvent) -> Result<EnrichmentOutcome, EnrichmentFailure> {
        let key = raw.param("uid").unwrap_or("anonymous");
        let url = format!("{}?uid={}", self.endpoint, key);

        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| EnrichmentFailure::Timeout {
                enrichment: self.id.clone(),
            })?
            .map_err(|e| EnrichmentFailure::LookupFailed {
                enrichment: self.id.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EnrichmentFailure::LookupFailed {
                enrichment: self.id.clone(),
                message: format!("endpoint returned status {}", response.status()),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| EnrichmentFailure::InvalidInput {
            enrichment: self.id.clone(),
            message: format!("response body was not valid JSON: {e}"),
        })?;

        Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(API_REQUEST_CONTEXT_SCHEMA, body)))
    }
}
