use async_trait::async_trait;
use enrich_core::{Ack, AckHandle, AttributedSink, ByteRecordSource, ByteSink, Checkpointer, Record, RecordMeta};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An in-process byte-record source, for local development and integration
/// tests that drive the runtime without a real message broker.
pub struct ChannelSource {
    partition_id: String,
    rx: mpsc::Receiver<Vec<u8>>,
    next_sequence: u64,
}

impl ChannelSource {
    pub fn new(partition_id: impl Into<String>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            partition_id: partition_id.into(),
            rx,
            next_sequence: 0,
        }
    }
}

#[async_trait]
impl ByteRecordSource for ChannelSource {
    async fn next(&mut self, cancel: &CancellationToken) -> anyhow::Result<Option<Record>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            received = self.rx.recv() => {
                let Some(bytes) = received else { return Ok(None) };
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                Ok(Some(Record {
                    bytes,
                    meta: RecordMeta {
                        partition_id: self.partition_id.clone(),
                        sequence,
                    },
                    ack_handle: AckHandle::new(sequence),
                }))
            }
        }
    }
}

/// The sink half of the channel pair. Implements both [`AttributedSink`]
/// and [`ByteSink`] since the channel itself carries no routing metadata —
/// attributes, when present, are dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AttributedSink for ChannelSink {
    async fn write(&self, bytes: Vec<u8>, attributes: HashMap<String, String>) -> anyhow::Result<Ack> {
        debug!(attributes = attributes.len(), "channel sink write");
        self.tx.send(bytes).await.map_err(|e| anyhow::anyhow!("channel sink closed: {e}"))?;
        Ok(Ack)
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write(&self, bytes: Vec<u8>) -> anyhow::Result<Ack> {
        self.tx.send(bytes).await.map_err(|e| anyhow::anyhow!("channel sink closed: {e}"))?;
        Ok(Ack)
    }
}

/// Records every checkpointed sequence number, for assertions in tests
/// that exercise the runtime's commit sequencer (§4.9).
pub struct ChannelCheckpointer {
    committed: AtomicU64,
}

impl ChannelCheckpointer {
    pub fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
        }
    }

    /// The highest acked sequence number committed so far.
    pub fn committed_through(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

impl Default for ChannelCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checkpointer for ChannelCheckpointer {
    async fn checkpoint(&self, ack_handle: AckHandle) -> anyhow::Result<()> {
        let sequence: u64 = ack_handle
            .downcast()
            .ok_or_else(|| anyhow::anyhow!("ack handle was not produced by ChannelSource"))?;
        self.committed.fetch_max(sequence + 1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_yields_records_with_increasing_sequence() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(b"a".to_vec()).await.unwrap();
        tx.send(b"b".to_vec()).await.unwrap();
        drop(tx);

        let mut source = ChannelSource::new("p0", rx);
        let cancel = CancellationToken::new();
        let first = source.next(&cancel).await.unwrap().unwrap();
        let second = source.next(&cancel).await.unwrap().unwrap();
        assert_eq!(first.meta.sequence, 0);
        assert_eq!(second.meta.sequence, 1);
        assert!(source.next(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_the_source() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(8);
        let mut source = ChannelSource::new("p0", rx);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(source.next(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpointer_tracks_highest_committed_sequence() {
        let checkpointer = ChannelCheckpointer::new();
        checkpointer.checkpoint(AckHandle::new(0u64)).await.unwrap();
        checkpointer.checkpoint(AckHandle::new(2u64)).await.unwrap();
        assert_eq!(checkpointer.committed_through(), 3);
    }
}
