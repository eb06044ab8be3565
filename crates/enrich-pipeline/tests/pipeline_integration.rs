use enrich_core::config::FeatureFlags;
use enrich_core::Enrichment;
use enrich_pipeline::enrichments::{JavascriptEnrichment, SqlQueryEnrichment, YauaaEnrichment};
use enrich_pipeline::{EnrichmentPipeline, PipelineOutcome, StaticResolver, ATOMIC_EVENT_SCHEMA_KEY};
use enrich_registry::{EnrichmentRegistry, PauseGate, Registry};
use std::collections::HashMap;
use std::sync::Arc;

fn raw_event() -> enrich_model::RawEvent {
    enrich_model::RawEvent {
        api_schema: "iglu:test/tp2".into(),
        parameters: HashMap::from([
            ("e".to_string(), "pv".to_string()),
            ("uid".to_string(), "u1".to_string()),
        ]),
        collector_timestamp_ms: 1_700_000_000_000,
        collector: Some("collector".into()),
        user_agent: Some("Mozilla/5.0 (Windows NT 10.0) Chrome/100.0".into()),
        ip_address: Some("1.2.3.4".into()),
        referer_uri: None,
        hostname: None,
        network_user_id: None,
        headers: vec![],
    }
}

fn validator_allowing(extra_schemas: &[&str]) -> enrich_pipeline::SchemaValidator {
    let mut schemas = HashMap::new();
    schemas.insert(ATOMIC_EVENT_SCHEMA_KEY.to_string(), serde_json::json!({}));
    for key in extra_schemas {
        schemas.insert(key.to_string(), serde_json::json!({}));
    }
    enrich_pipeline::SchemaValidator::new(Box::new(StaticResolver::new(schemas)))
}

/// Empty enrichment list: good output equals the decoded envelope with
/// only standard derived fields populated (§8 boundary behavior).
#[tokio::test]
async fn empty_enrichment_list_yields_standard_fields_only() {
    let registry = Arc::new(EnrichmentRegistry::new(Registry::empty()));
    let gate = Arc::new(PauseGate::new());
    gate.open();
    let validator = Arc::new(validator_allowing(&[]));
    let pipeline = EnrichmentPipeline::new(registry, gate, validator, FeatureFlags::default());

    let raw = raw_event();
    match pipeline.process(&raw, b"payload").await {
        PipelineOutcome::Good { event, pii_event } => {
            assert!(event.derived_contexts.is_empty());
            assert!(pii_event.is_none());
            assert_eq!(event.event.as_deref(), Some("pv"));
        }
        PipelineOutcome::Bad { .. } => panic!("expected good"),
    }
}

/// Feeds the four built-in I/O enrichments together and checks every good
/// event carries exactly their four context schemas, in run order (§8
/// "Enrichment contexts scenario", minus ApiRequest which needs a live
/// endpoint and is exercised in its own unit test instead).
#[tokio::test]
async fn three_local_enrichments_each_contribute_one_context_in_order() {
    let sql = Arc::new(SqlQueryEnrichment::new(
        "sql_query".into(),
        "u1=plan:gold".into(),
        "select plan from users where id = :uid".into(),
    ));
    let js = Arc::new(JavascriptEnrichment::new(
        "javascript".into(),
        r#"return {"tag": "ok"};"#.into(),
    ));
    let yauaa = Arc::new(YauaaEnrichment::new("yauaa".into(), 100));

    let enrichments: Vec<Arc<dyn Enrichment>> = vec![sql, js, yauaa];
    let registry = Arc::new(EnrichmentRegistry::new(Arc::new(Registry::new(vec![], enrichments))));
    let gate = Arc::new(PauseGate::new());
    gate.open();
    let validator = Arc::new(validator_allowing(&[
        "iglu:com.enrich/sql_query_context/jsonschema/1-0-0",
        "iglu:com.enrich/javascript_context/jsonschema/1-0-0",
        "iglu:com.enrich/ua_parser_context/jsonschema/1-0-0",
    ]));
    let pipeline = EnrichmentPipeline::new(registry, gate, validator, FeatureFlags::default());

    let raw = raw_event();
    match pipeline.process(&raw, b"payload").await {
        PipelineOutcome::Good { event, .. } => {
            assert_eq!(event.derived_contexts.len(), 3);
            assert_eq!(event.derived_contexts[0].schema, "iglu:com.enrich/sql_query_context/jsonschema/1-0-0");
            assert_eq!(event.derived_contexts[1].schema, "iglu:com.enrich/javascript_context/jsonschema/1-0-0");
            assert_eq!(event.derived_contexts[2].schema, "iglu:com.enrich/ua_parser_context/jsonschema/1-0-0");
        }
        PipelineOutcome::Bad { bad_row } => panic!("expected good, got bad row: {:?}", bad_row.to_json()),
    }
}

/// `legacyEnrichmentOrder` reorders regardless of declaration order.
#[tokio::test]
async fn legacy_order_flag_reorders_enrichments() {
    let js = Arc::new(JavascriptEnrichment::new("javascript".into(), r#"return {"tag": "js"};"#.into()));
    let yauaa = Arc::new(YauaaEnrichment::new("yauaa".into(), 100));

    // Declared javascript-then-yauaa; legacy order puts yauaa first.
    let enrichments: Vec<Arc<dyn Enrichment>> = vec![js, yauaa];
    let registry = Arc::new(EnrichmentRegistry::new(Arc::new(Registry::new(vec![], enrichments))));
    let gate = Arc::new(PauseGate::new());
    gate.open();
    let validator = Arc::new(validator_allowing(&[
        "iglu:com.enrich/javascript_context/jsonschema/1-0-0",
        "iglu:com.enrich/ua_parser_context/jsonschema/1-0-0",
    ]));
    let flags = FeatureFlags {
        legacy_enrichment_order: true,
        ..Default::default()
    };
    let pipeline = EnrichmentPipeline::new(registry, gate, validator, flags);

    let raw = raw_event();
    match pipeline.process(&raw, b"payload").await {
        PipelineOutcome::Good { event, .. } => {
            assert_eq!(event.derived_contexts[0].schema, "iglu:com.enrich/ua_parser_context/jsonschema/1-0-0");
            assert_eq!(event.derived_contexts[1].schema, "iglu:com.enrich/javascript_context/jsonschema/1-0-0");
        }
        PipelineOutcome::Bad { .. } => panic!("expected good"),
    }
}
