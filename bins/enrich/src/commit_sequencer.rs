use enrich_core::{AckHandle, Checkpointer, RecordMeta};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

struct Pending {
    ack_handle: Option<AckHandle>,
    remaining_acks: usize,
}

/// Preserves per-partition checkpoint order even though the derived events
/// of one record can finish their sink writes out of order, and distinct
/// records on the same partition can be in flight at once (§4.9,
/// invariant 3).
///
/// A record is only released to the checkpointer once every earlier
/// sequence number on its partition has already been released — tracked
/// here as a `BTreeMap` keyed by sequence so "earliest pending" is always
/// the first entry.
pub struct CommitSequencer {
    checkpointer: Arc<dyn Checkpointer>,
    partitions: Mutex<HashMap<String, BTreeMap<u64, Pending>>>,
}

impl CommitSequencer {
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            checkpointer,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Register one source record with the number of sink acks it expects
    /// before it is eligible for checkpointing (possibly zero, for an
    /// empty collector payload — invariant 2 still requires it checkpoint).
    pub async fn register(&self, meta: RecordMeta, ack_handle: AckHandle, expected_acks: usize) {
        let mut partitions = self.partitions.lock().await;
        let entry = partitions.entry(meta.partition_id.clone()).or_default();
        entry.insert(
            meta.sequence,
            Pending {
                ack_handle: Some(ack_handle),
                remaining_acks: expected_acks,
            },
        );
        drop(partitions);
        if expected_acks == 0 {
            self.try_flush(&meta.partition_id).await;
        }
    }

    /// Record that one derived event of `meta`'s record has been durably
    /// acked by its sink; flushes every now-ready prefix on the partition.
    pub async fn ack(&self, meta: &RecordMeta) {
        {
            let mut partitions = self.partitions.lock().await;
            if let Some(entries) = partitions.get_mut(&meta.partition_id) {
                if let Some(pending) = entries.get_mut(&meta.sequence) {
                    pending.remaining_acks = pending.remaining_acks.saturating_sub(1);
                } else {
                    warn!(partition = %meta.partition_id, sequence = meta.sequence, "ack for unregistered record");
                }
            }
        }
        self.try_flush(&meta.partition_id).await;
    }

    async fn try_flush(&self, partition_id: &str) {
        let mut ready = Vec::new();
        {
            let mut partitions = self.partitions.lock().await;
            if let Some(entries) = partitions.get_mut(partition_id) {
                loop {
                    let Some((&sequence, pending)) = entries.iter().next() else {
                        break;
                    };
                    if pending.remaining_acks != 0 {
                        break;
                    }
                    let mut pending = entries.remove(&sequence).unwrap();
                    ready.push(pending.ack_handle.take().unwrap());
                }
            }
        }
        for ack_handle in ready {
            if let Err(e) = self.checkpointer.checkpoint(ack_handle).await {
                error!(error = %e, "checkpoint failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCheckpointer {
        count: AtomicUsize,
    }

    #[async_trait]
    impl Checkpointer for CountingCheckpointer {
        async fn checkpoint(&self, _ack_handle: AckHandle) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn meta(partition: &str, sequence: u64) -> RecordMeta {
        RecordMeta {
            partition_id: partition.to_string(),
            sequence,
        }
    }

    #[tokio::test]
    async fn releases_in_order_even_if_second_record_finishes_first() {
        let checkpointer = Arc::new(CountingCheckpointer {
            count: AtomicUsize::new(0),
        });
        let sequencer = CommitSequencer::new(checkpointer.clone());

        sequencer.register(meta("p0", 0), AckHandle::new(0u64), 1).await;
        sequencer.register(meta("p0", 1), AckHandle::new(1u64), 1).await;

        // record 1 finishes first; must not checkpoint until record 0 does.
        sequencer.ack(&meta("p0", 1)).await;
        assert_eq!(checkpointer.count.load(Ordering::SeqCst), 0);

        sequencer.ack(&meta("p0", 0)).await;
        assert_eq!(checkpointer.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_expected_acks_checkpoints_immediately() {
        let checkpointer = Arc::new(CountingCheckpointer {
            count: AtomicUsize::new(0),
        });
        let sequencer = CommitSequencer::new(checkpointer.clone());
        sequencer.register(meta("p0", 0), AckHandle::new(0u64), 0).await;
        assert_eq!(checkpointer.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let checkpointer = Arc::new(CountingCheckpointer {
            count: AtomicUsize::new(0),
        });
        let sequencer = CommitSequencer::new(checkpointer.clone());
        sequencer.register(meta("p0", 0), AckHandle::new(0u64), 1).await;
        sequencer.register(meta("p1", 0), AckHandle::new(0u64), 1).await;

        sequencer.ack(&meta("p1", 0)).await;
        assert_eq!(checkpointer.count.load(Ordering::SeqCst), 1);
    }
}
