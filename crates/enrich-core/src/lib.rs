//! # Enrich Core
//!
//! Trait contracts and configuration types shared by every crate in the
//! Enrich workspace: the I/O boundary ([`io_traits`]), the `Enrichment`
//! contract ([`enrichment`]), and the pipeline's static configuration
//! ([`config`]).

#![allow(unused)]

pub mod config;
pub mod enrichment;
pub mod error;
pub mod io_traits;

pub use enrichment::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
pub use error::EnrichError;
pub use io_traits::{Ack, AckHandle, AttributedSink, ByteRecordSource, ByteSink, Checkpointer, Record, RecordMeta};
