use async_trait::async_trait;
use enrich_model::{EnrichedEvent, PiiField, RawEvent, SelfDescribingJson};
use std::path::PathBuf;

/// Contents appended to an event by a single successful enrichment run:
/// zero or more derived contexts, in the enrichment's own output order,
/// plus any pseudonymised field updates.
#[derive(Debug, Default, Clone)]
pub struct EnrichmentOutcome {
    pub contexts: Vec<SelfDescribingJson>,
    pub pii_updates: Vec<PiiField>,
}

impl EnrichmentOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, ctx: SelfDescribingJson) -> Self {
        self.contexts.push(ctx);
        self
    }
}

/// Why a single enrichment failed for a single event (§4.6 step 4, §7.3).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichmentFailure {
    #[error("enrichment '{enrichment}' timed out")]
    Timeout { enrichment: String },

    #[error("enrichment '{enrichment}' lookup failed: {message}")]
    LookupFailed { enrichment: String, message: String },

    #[error("enrichment '{enrichment}' received invalid input: {message}")]
    InvalidInput { enrichment: String, message: String },
}

/// A declared remote asset an enrichment depends on (GeoIP DBs, IAB lists,
/// ...). The [`enrich-registry`] crate owns downloading and atomically
/// swapping the files these describe; an enrichment only ever reads through
/// the local path it's handed at construction time.
#[derive(Debug, Clone)]
pub struct AssetDecl {
    pub uri: String,
    pub local_path: PathBuf,
}

/// A unit of per-event enrichment logic: declared assets, static
/// configuration, and a `run` contract over `(raw, partial_enriched)`.
///
/// Implementations must be safe to invoke concurrently from many pipeline
/// workers holding the same [`enrich-registry`] snapshot (invariant 4).
#[async_trait]
pub trait Enrichment: Send + Sync {
    /// Stable identifier used for logging, metrics, and `legacyEnrichmentOrder`.
    fn name(&self) -> &str;

    /// Assets this enrichment was built against; empty for enrichments that
    /// need no reference data (e.g. a pure UA parser table bundled in-binary
    /// still counts if it's loaded from a declared asset path).
    fn assets(&self) -> &[AssetDecl] {
        &[]
    }

    /// Run this enrichment against one event. `partial` reflects the output
    /// of every earlier enrichment in declaration order; it must not be
    /// mutated here — outcomes are merged by the pipeline so that ordering
    /// and PII bookkeeping stay centralized (§4.6).
    async fn run(
        &self,
        raw: &RawEvent,
        partial: &EnrichedEvent,
    ) -> Result<EnrichmentOutcome, EnrichmentFailure>;
}
