use crate::bad_row_builder::BadRowBuilder;
use crate::legacy_order::legacy_rank;
use crate::schema_validator::{SchemaFailure, SchemaValidator};
use enrich_core::config::FeatureFlags;
use enrich_core::{Enrichment, EnrichmentFailure};
use enrich_model::{BadRow, EnrichedEvent, SelfDescribingJson};
use enrich_registry::EnrichmentRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Schema key atomic (flat-field) events are validated against (§4.6 step
/// 6, invariant 1's "its `event` schema").
pub const ATOMIC_EVENT_SCHEMA_KEY: &str = "iglu:com.enrich/atomic_event/jsonschema/1-0-0";

/// Default per-enrichment timeout (§5 "Cancellation").
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// The classified result of running one event through the pipeline.
pub enum PipelineOutcome {
    Good {
        event: EnrichedEvent,
        pii_event: Option<EnrichedEvent>,
    },
    Bad {
        bad_row: BadRow,
    },
}

/// Per-event orchestration: run enrichments in order, validate, classify
/// into good/pii/bad (§4.6).
pub struct EnrichmentPipeline {
    registry: Arc<EnrichmentRegistry>,
    gate: Arc<enrich_registry::PauseGate>,
    validator: Arc<SchemaValidator>,
    flags: FeatureFlags,
    enrichment_timeout: Duration,
}

impl EnrichmentPipeline {
    pub fn new(
        registry: Arc<EnrichmentRegistry>,
        gate: Arc<enrich_registry::PauseGate>,
        validator: Arc<SchemaValidator>,
        flags: FeatureFlags,
    ) -> Self {
        Self {
            registry,
            gate,
            validator,
            flags,
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }

    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = timeout;
        self
    }

    /// Run one raw event through the pipeline end to end. `raw_payload` is
    /// the original record bytes, carried into any bad row this event
    /// produces.
    pub async fn process(
        &self,
        raw: &enrich_model::RawEvent,
        raw_payload: &[u8],
    ) -> PipelineOutcome {
        // Step 1: await the pause gate before doing any enrichment work
        // (§4.5, invariant 5: no new event enters the pipeline mid-swap).
        let mut gate_reader = self.gate.reader();
        gate_reader.closed().await;

        // Step 2: capture one registry snapshot for this event's entire
        // lifetime (invariant 4). Holding `snapshot` alive for the
        // function body is what keeps the in-flight count honest for the
        // asset manager's drain barrier.
        let snapshot = self.registry.enter();

        // Step 3: build the mutable enriched event from the envelope.
        let event_id = Uuid::new_v4().to_string();
        let mut event = EnrichedEvent::from_raw(raw, event_id);
        event.unstruct_event = extract_unstruct_event(raw);

        // Step 4: run enrichments in order.
        let mut ordered: Vec<&Arc<dyn Enrichment>> = snapshot.enrichments.iter().collect();
        if self.flags.legacy_enrichment_order {
            ordered.sort_by_key(|e| legacy_rank(e.name()));
        }

        let mut enrichment_failures = Vec::new();
        for enrichment in ordered {
            let outcome = tokio::time::timeout(self.enrichment_timeout, enrichment.run(raw, &event)).await;
            match outcome {
                Ok(Ok(outcome)) => {
                    for ctx in outcome.contexts {
                        event.push_context(ctx);
                    }
                    for pii in outcome.pii_updates {
                        event.push_pii(pii);
                    }
                }
                Ok(Err(failure)) => {
                    warn!(enrichment = enrichment.name(), error = %failure, "enrichment failed");
                    metrics::counter!("enrich_enrichment_failures_total", "enrichment" => enrichment.name().to_string()).increment(1);
                    enrichment_failures.push(failure);
                }
                Err(_elapsed) => {
                    let failure = EnrichmentFailure::Timeout {
                        enrichment: enrichment.name().to_string(),
                    };
                    warn!(enrichment = enrichment.name(), "enrichment timed out");
                    enrichment_failures.push(failure);
                }
            }
        }

        // Step 5: derived timestamps, computed once after every enrichment
        // has run.
        let now = chrono::Utc::now().to_rfc3339();
        event.etl_tstamp = Some(now.clone());
        event.collector_tstamp = Some(
            chrono::DateTime::from_timestamp_millis(raw.collector_timestamp_ms)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| now.clone()),
        );
        event.derived_tstamp = Some(now);

        // Step 6: validate.
        let mut schema_failures = Vec::new();
        if let Err(e) = self.validate_atomic(&event).await {
            schema_failures.push(e);
        }
        for target in event.validation_targets() {
            if let Err(e) = self.validator.validate(&target.schema, &target.data).await {
                schema_failures.push(e);
            }
        }

        debug!(
            event_id = %event.event_id,
            enrichment_failures = enrichment_failures.len(),
            schema_failures = schema_failures.len(),
            "pipeline finished processing event"
        );

        // `snapshot` is dropped here, releasing this event's in-flight slot.
        drop(snapshot);

        // Step 7: classify.
        self.classify(event, enrichment_failures, schema_failures, raw_payload)
    }

    async fn validate_atomic(&self, event: &EnrichedEvent) -> Result<(), SchemaFailure> {
        let data = serde_json::json!({
            "event_id": event.event_id,
            "event": event.event,
            "app_id": event.app_id,
            "platform": event.platform,
        });
        self.validator.validate(ATOMIC_EVENT_SCHEMA_KEY, &data).await
    }

    fn classify(
        &self,
        event: EnrichedEvent,
        enrichment_failures: Vec<EnrichmentFailure>,
        schema_failures: Vec<SchemaFailure>,
        raw_payload: &[u8],
    ) -> PipelineOutcome {
        if enrichment_failures.is_empty() && schema_failures.is_empty() {
            return self.emit_good(event);
        }

        if !schema_failures.is_empty() && self.flags.accept_invalid {
            // `acceptInvalid`: validation failures don't route to bad; the
            // event goes to good with a diagnostic context appended.
            let mut event = event;
            event.push_context(diagnostic_context(&schema_failures));
            if enrichment_failures.is_empty() {
                return self.emit_good(event);
            }
            // Enrichment failures still route to bad even under
            // acceptInvalid, which only waives schema validation.
            let bad_row = BadRowBuilder::from_enrichment_failures(&enrichment_failures, raw_payload.to_vec());
            return PipelineOutcome::Bad { bad_row };
        }

        let bad_row = BadRowBuilder::from_combined(&enrichment_failures, &schema_failures, raw_payload.to_vec());
        PipelineOutcome::Bad { bad_row }
    }

    fn emit_good(&self, event: EnrichedEvent) -> PipelineOutcome {
        // Open question 2: the PII twin is not emitted when the primary
        // event is routed to bad, so this path (only reached for
        // good-bound events) is the only place a twin is constructed.
        let pii_event = if event.pii.is_some() { Some(event.clone()) } else { None };
        PipelineOutcome::Good { event, pii_event }
    }
}

fn diagnostic_context(failures: &[SchemaFailure]) -> SelfDescribingJson {
    SelfDescribingJson::new(
        "iglu:com.enrich/validation_diagnostic/jsonschema/1-0-0",
        serde_json::json!({
            "messages": failures.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
        }),
    )
}

/// Parses the `ue_pr` tracker parameter (the unstructured-event envelope)
/// into its inner self-describing payload, if present.
fn extract_unstruct_event(raw: &enrich_model::RawEvent) -> Option<SelfDescribingJson> {
    let ue_pr = raw.param("ue_pr")?;
    let envelope: serde_json::Value = serde_json::from_str(ue_pr).ok()?;
    let data = envelope.get("data")?;
    let schema = data.get("schema")?.as_str()?.to_string();
    let inner_data = data.get("data")?.clone();
    Some(SelfDescribingJson::new(schema, inner_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_validator::StaticResolver;
    use enrich_core::EnrichmentOutcome;
    use enrich_registry::{PauseGate, Registry};
    use std::collections::HashMap;

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl Enrichment for AlwaysOk {
        fn name(&self) -> &str {
            "always_ok"
        }
        async fn run(
            &self,
            _raw: &enrich_model::RawEvent,
            _partial: &EnrichedEvent,
        ) -> Result<EnrichmentOutcome, EnrichmentFailure> {
            Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(
                "iglu:test/ctx/jsonschema/1-0-0",
                serde_json::json!({}),
            )))
        }
    }

    struct AlwaysFails;
    #[async_trait::async_trait]
    impl Enrichment for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }
        async fn run(
            &self,
            _raw: &enrich_model::RawEvent,
            _partial: &EnrichedEvent,
        ) -> Result<EnrichmentOutcome, EnrichmentFailure> {
            Err(EnrichmentFailure::InvalidInput {
                enrichment: "always_fails".into(),
                message: "nope".into(),
            })
        }
    }

    fn raw_event() -> enrich_model::RawEvent {
        enrich_model::RawEvent {
            api_schema: "iglu:test/tp2".into(),
            parameters: HashMap::from([("e".to_string(), "pv".to_string())]),
            collector_timestamp_ms: 1_700_000_000_000,
            collector: Some("c".into()),
            user_agent: Some("ua".into()),
            ip_address: Some("1.2.3.4".into()),
            referer_uri: None,
            hostname: None,
            network_user_id: None,
            headers: vec![],
        }
    }

    fn resolver_allow_all() -> StaticResolver {
        let mut map = std::collections::HashMap::new();
        map.insert(ATOMIC_EVENT_SCHEMA_KEY.to_string(), serde_json::json!({}));
        map.insert("iglu:test/ctx/jsonschema/1-0-0".to_string(), serde_json::json!({}));
        StaticResolver::new(map)
    }

    fn make_pipeline(enrichments: Vec<Arc<dyn Enrichment>>, flags: FeatureFlags) -> EnrichmentPipeline {
        let registry = Arc::new(EnrichmentRegistry::new(Arc::new(Registry::new(vec![], enrichments))));
        let gate = Arc::new(PauseGate::new());
        gate.open();
        let validator = Arc::new(SchemaValidator::new(Box::new(resolver_allow_all())));
        EnrichmentPipeline::new(registry, gate, validator, flags)
    }

    #[tokio::test]
    async fn empty_enrichment_list_produces_good_with_standard_fields() {
        let pipeline = make_pipeline(vec![], FeatureFlags::default());
        let raw = raw_event();
        match pipeline.process(&raw, b"payload").await {
            PipelineOutcome::Good { event, pii_event } => {
                assert!(event.derived_contexts.is_empty());
                assert!(event.derived_tstamp.is_some());
                assert!(pii_event.is_none());
            }
            PipelineOutcome::Bad { .. } => panic!("expected good"),
        }
    }

    #[tokio::test]
    async fn successful_enrichment_appends_context_in_order() {
        let pipeline = make_pipeline(vec![Arc::new(AlwaysOk)], FeatureFlags::default());
        let raw = raw_event();
        match pipeline.process(&raw, b"payload").await {
            PipelineOutcome::Good { event, .. } => {
                assert_eq!(event.derived_contexts.len(), 1);
                assert_eq!(event.derived_contexts[0].schema, "iglu:test/ctx/jsonschema/1-0-0");
            }
            PipelineOutcome::Bad { .. } => panic!("expected good"),
        }
    }

    #[tokio::test]
    async fn failing_enrichment_routes_to_bad() {
        let pipeline = make_pipeline(vec![Arc::new(AlwaysFails)], FeatureFlags::default());
        let raw = raw_event();
        match pipeline.process(&raw, b"payload").await {
            PipelineOutcome::Bad { bad_row } => {
                assert!(matches!(bad_row.schema, enrich_model::BadRowSchema::EnrichmentFailure));
            }
            PipelineOutcome::Good { .. } => panic!("expected bad"),
        }
    }
}
