use async_trait::async_trait;
use enrich_core::{Ack, AttributedSink, ByteSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Acks every write without persisting it. Used by the `Null` output
/// driver for throughput benchmarking and for sinks a deployment chooses
/// not to wire up (e.g. `output.pii` left unset).
pub struct NullSink {
    count: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteSink for NullSink {
    async fn write(&self, _bytes: Vec<u8>) -> anyhow::Result<Ack> {
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(Ack)
    }
}

#[async_trait]
impl AttributedSink for NullSink {
    async fn write(&self, _bytes: Vec<u8>, _attributes: HashMap<String, String>) -> anyhow::Result<Ack> {
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_writes() {
        let sink = NullSink::new();
        ByteSink::write(&sink, b"x".to_vec()).await.unwrap();
        AttributedSink::write(&sink, b"y".to_vec(), HashMap::new()).await.unwrap();
        assert_eq!(sink.count(), 2);
    }
}
