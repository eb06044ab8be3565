use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// An opaque source-specific acknowledgement handle.
///
/// The core never inspects this — it only carries it from the source to the
/// checkpointer (§4.1). Concrete source drivers downcast their own handles
/// back out in their own [`Checkpointer`] implementation.
pub struct AckHandle(pub Box<dyn Any + Send + Sync>);

impl AckHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast<T: Any>(self) -> Option<T> {
        self.0.downcast::<T>().ok().map(|b| *b)
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AckHandle(..)")
    }
}

/// Source-specific identity of a [`Record`]'s partition, not inspected by
/// the core beyond preserving per-partition checkpoint order (invariant 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordMeta {
    pub partition_id: String,
    /// Monotonically increasing within a partition; used by the runtime's
    /// commit sequencer (§4.9) to release checkpoints in arrival order.
    pub sequence: u64,
}

/// A pull-based record from the source: payload bytes plus the metadata
/// the runtime needs to checkpoint it once all derived events are acked.
pub struct Record {
    pub bytes: Vec<u8>,
    pub meta: RecordMeta,
    pub ack_handle: AckHandle,
}

/// A pull-based, cancellable stream of [`Record`]s (§4.1).
///
/// Records may arrive in any order across partitions but in order within a
/// partition. The source owns upstream flow control; the core only pulls.
#[async_trait]
pub trait ByteRecordSource: Send {
    /// Pull the next record, or `None` once the source is exhausted.
    /// Must return promptly once `cancel` is triggered.
    async fn next(&mut self, cancel: &CancellationToken) -> anyhow::Result<Option<Record>>;
}

/// Acknowledgement that a sink write was durably accepted.
#[derive(Debug, Clone, Copy)]
pub struct Ack;

/// A sink for good/pii output: bytes plus routing attributes drawn from a
/// whitelist of EnrichedEvent field names (§6).
#[async_trait]
pub trait AttributedSink: Send + Sync {
    async fn write(&self, bytes: Vec<u8>, attributes: HashMap<String, String>) -> anyhow::Result<Ack>;
}

/// A sink for bad output: bytes only, no attributes.
#[async_trait]
pub trait ByteSink: Send + Sync {
    async fn write(&self, bytes: Vec<u8>) -> anyhow::Result<Ack>;
}

/// Durable acknowledgement of a source record. Must be idempotent.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(&self, ack_handle: AckHandle) -> anyhow::Result<()>;
}
