//! # Enrich IO
//!
//! Concrete drivers behind [`enrich_core::io_traits`]'s generic traits: a
//! local development/test pair backed by in-process channels, and a
//! newline-delimited file pair for running the engine against a static
//! fixture (§4.1, §6). Cloud-specific drivers (Kinesis, PubSub, Kafka) are
//! an external collaborator concern, not reproduced here.

mod channel;
mod file;
mod null_sink;

pub use channel::{ChannelCheckpointer, ChannelSink, ChannelSource};
pub use file::{FileSink, FileSource};
pub use null_sink::NullSink;
