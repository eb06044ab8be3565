//! # Enrich Pipeline
//!
//! The per-event orchestration at the heart of the system: running an
//! ordered set of [`enrich_core::Enrichment`]s against one event, validating
//! the result, and classifying it into the good/pii/bad outcome the runtime
//! routes to sinks (§4.6).

mod bad_row_builder;
mod legacy_order;
mod pipeline;
mod schema_validator;

pub mod enrichments;

pub use bad_row_builder::BadRowBuilder;
pub use legacy_order::{legacy_rank, LEGACY_ENRICHMENT_ORDER};
pub use pipeline::{EnrichmentPipeline, PipelineOutcome, ATOMIC_EVENT_SCHEMA_KEY, DEFAULT_ENRICHMENT_TIMEOUT};
pub use schema_validator::{ResolveOutcome, SchemaFailure, SchemaResolver, SchemaValidator, StaticResolver};
