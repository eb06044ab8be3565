use crate::{RawEvent, SelfDescribingJson};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pseudonymised field captured for the PII twin, recording the original
/// field name, the strategy used, and the resulting hashed/masked value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PiiField {
    pub field_name: String,
    pub strategy: String,
    pub value: String,
}

/// The flat, ordered enriched event record.
///
/// The real system carries on the order of 130 named fields (atomic scalars
/// mirroring the canonical tracker protocol plus enrichment-populated
/// derived fields). This type carries the fields every invariant and
/// testable property in the specification actually touches — envelope,
/// identity, derived timestamps, and the two structurally significant
/// sub-documents (`derived_contexts`, `pii`) — plus an `extra` bag for the
/// remainder of the canonical field set, so enrichments and tests can add
/// named scalars without the struct growing without bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedEvent {
    // --- identity / envelope, populated from RawEvent at pipeline entry ---
    pub event_id: String,
    pub event: Option<String>,
    pub event_vendor: Option<String>,
    pub event_name: Option<String>,
    pub event_format: Option<String>,
    pub event_version: Option<String>,

    pub app_id: Option<String>,
    pub platform: Option<String>,
    pub collector: Option<String>,
    pub user_ipaddress: Option<String>,
    pub useragent: Option<String>,
    pub page_referrer: Option<String>,
    pub network_userid: Option<String>,

    // --- derived timestamps, populated deterministically by the pipeline
    //     after all enrichments have run (step 5 of §4.6) ---
    pub collector_tstamp: Option<String>,
    pub dvce_created_tstamp: Option<String>,
    pub derived_tstamp: Option<String>,
    pub etl_tstamp: Option<String>,

    /// Unstructured event payload, when `event` is `"ue"`. Carries its own
    /// schema so it can be validated the same way as a derived context.
    pub unstruct_event: Option<SelfDescribingJson>,

    /// Contexts appended by enrichments, in enrichment declaration order;
    /// within one enrichment's output, that enrichment's own order.
    pub derived_contexts: Vec<SelfDescribingJson>,

    /// Contexts the tracker itself sent, validated the same way as
    /// derived contexts but never reordered by the pipeline.
    pub tracker_contexts: Vec<SelfDescribingJson>,

    /// Present only when at least one enrichment produced a pseudonymised
    /// field; presence is what determines whether the PII twin is emitted.
    pub pii: Option<Vec<PiiField>>,

    /// The remainder of the canonical scalar field set (geo_country,
    /// geo_city, os_family, br_family, ...), populated by enrichments that
    /// don't warrant their own named field on this struct.
    pub extra: std::collections::BTreeMap<String, Value>,
}

impl EnrichedEvent {
    /// Build the envelope-populated skeleton for a raw event (§4.6 step 3).
    pub fn from_raw(raw: &RawEvent, event_id: String) -> Self {
        Self {
            event_id,
            event: raw.param("e").map(str::to_string),
            event_vendor: None,
            event_name: None,
            event_format: None,
            event_version: None,
            app_id: raw.param("aid").map(str::to_string),
            platform: raw.param("p").map(str::to_string),
            collector: raw.collector.clone(),
            user_ipaddress: raw.ip_address.clone(),
            useragent: raw.user_agent.clone(),
            page_referrer: raw.referer_uri.clone(),
            network_userid: raw.network_user_id.clone(),
            collector_tstamp: None,
            dvce_created_tstamp: raw.param("dtm").map(str::to_string),
            derived_tstamp: None,
            etl_tstamp: None,
            unstruct_event: None,
            derived_contexts: Vec::new(),
            tracker_contexts: Vec::new(),
            pii: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    /// Append a context produced by an enrichment, preserving call order.
    pub fn push_context(&mut self, ctx: SelfDescribingJson) {
        self.derived_contexts.push(ctx);
    }

    /// Record a pseudonymised field; creates the `pii` list on first use.
    pub fn push_pii(&mut self, field: PiiField) {
        self.pii.get_or_insert_with(Vec::new).push(field);
    }

    /// All self-describing payloads subject to schema validation (§4.6
    /// step 6): the top-level `event` schema (via `unstruct_event`, when
    /// present) plus every derived context.
    pub fn validation_targets(&self) -> Vec<&SelfDescribingJson> {
        self.unstruct_event.iter().chain(self.derived_contexts.iter()).collect()
    }
}
