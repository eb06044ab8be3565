use async_trait::async_trait;
use enrich_core::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
use enrich_model::{EnrichedEvent, RawEvent, SelfDescribingJson};
use std::collections::HashMap;
use std::sync::RwLock;

const SQL_QUERY_CONTEXT_SCHEMA: &str = "iglu:com.enrich/sql_query_context/jsonschema/1-0-0";

/// Executes `query` against a row keyed by the event's user id and returns
/// the matched columns, or `None` on a miss.
///
/// A real connection pool (`sqlx`, `tokio-postgres`, ...) is an external
/// collaborator this crate doesn't carry a driver for (§1); this trait is
/// the seam a deployment wires a real one behind. [`SqlQueryEnrichment`]
/// defaults to [`InMemoryExecutor`], which treats `connection_string` as a
/// `key=col:val,col:val;key=...` table, for local development and tests.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<HashMap<String, String>>, String>;
}

pub struct InMemoryExecutor {
    rows: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryExecutor {
    /// Parses `key=col:val,col:val;key2=...` into a row table.
    pub fn from_connection_string(spec: &str) -> Self {
        let mut rows = HashMap::new();
        for entry in spec.split(';').filter(|e| !e.trim().is_empty()) {
            let Some((key, cols)) = entry.split_once('=') else { continue };
            let row = cols
                .split(',')
                .filter_map(|pair| pair.split_once(':'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            rows.insert(key.to_string(), row);
        }
        Self { rows: RwLock::new(rows) }
    }
}

#[async_trait]
impl QueryExecutor for InMemoryExecutor {
    async fn lookup(&self, key: &str) -> Result<Option<HashMap<String, String>>, String> {
        Ok(self.rows.read().expect("sql_query table lock poisoned").get(key).cloned())
    }
}

pub struct SqlQueryEnrichment {
    id: String,
    query: String,
    executor: Box<dyn QueryExecutor>,
}

impl SqlQueryEnrichment {
    pub fn new(id: String, connection_string: String, query: String) -> Self {
        Self::with_executor(id, query, Box::new(InMemoryExecutor::from_connection_string(&connection_string)))
    }

    pub fn with_executor(id: String, query: String, executor: Box<dyn QueryExecutor>) -> Self {
        Self { id, query, executor }
    }
}

#[async_trait]
impl Enrichment for SqlQueryEnrichment {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, raw: &RawEvent, _partial: &EnrichedEvent) -> Result<EnrichmentOutcome, EnrichmentFailure> {
        let key = raw.param("uid").unwrap_or("anonymous");
        let row = self.executor.lookup(key).await.map_err(|message| EnrichmentFailure::LookupFailed {
            enrichment: self.id.clone(),
            message,
        })?;

        let Some(row) = row else {
            return Ok(EnrichmentOutcome::empty());
        };

        tracing::trace!(enrichment = %self.id, query = %self.query, "sql_query row matched");
        Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(
            SQL_QUERY_CONTEXT_SCHEMA,
            serde_json::to_value(row).unwrap_or_default(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_uid(uid: &str) -> RawEvent {
        RawEvent {
            api_schema: "iglu:test/tp2".into(),
            parameters: HashMap::from([("uid".to_string(), uid.to_string())]),
            collector_timestamp_ms: 0,
            collector: None,
            user_agent: None,
            ip_address: None,
            referer_uri: None,
            hostname: None,
            network_user_id: None,
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn matched_row_produces_context() {
        let enrichment = SqlQueryEnrichment::new(
            "sql_query".into(),
            "u1=plan:gold,tier:1".into(),
            "select plan, tier from users where id = :uid".into(),
        );
        let raw = raw_with_uid("u1");
        let partial = EnrichedEvent::from_raw(&raw, "id".into());
        let outcome = enrichment.run(&raw, &partial).await.unwrap();
        assert_eq!(outcome.contexts[0].data["plan"], "gold");
    }

    #[tokio::test]
    async fn missing_row_produces_no_context() {
        let enrichment = SqlQueryEnrichment::new("sql_query".into(), "u1=plan:gold".into(), "select 1".into());
        let raw = raw_with_uid("u2");
        let partial = EnrichedEvent::from_raw(&raw, "id".into());
        let outcome = enrichment.run(&raw, &partial).await.unwrap();
        assert!(outcome.contexts.is_empty());
    }
}
