//! # Enrich Model
//!
//! Data types shared across the enrichment pipeline: the unenriched
//! [`RawEvent`], the flat [`EnrichedEvent`] output record, the decoded
//! [`CollectorPayload`] envelope, and the self-describing [`BadRow`] failure
//! record. This crate is pure data plus (de)serialization — no I/O, no
//! async, no trait objects.

mod bad_row;
mod collector_payload;
mod enriched_event;
mod raw_event;
mod self_describing;

pub use bad_row::{BadRow, BadRowSchema, FailureDetail, FailureMessage, Processor};
pub use collector_payload::CollectorPayload;
pub use enriched_event::{EnrichedEvent, PiiField};
pub use raw_event::RawEvent;
pub use self_describing::SelfDescribingJson;

/// Identity of this processing artifact, stamped onto every [`BadRow`].
pub const PROCESSOR_ARTIFACT: &str = "enrich-core";

/// Version stamped onto every [`BadRow`]; bumped with releases.
pub const PROCESSOR_VERSION: &str = env!("CARGO_PKG_VERSION");
