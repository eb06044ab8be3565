use crate::commit_sequencer::CommitSequencer;
use enrich_core::{AttributedSink, ByteRecordSource, ByteSink, EnrichError, RecordMeta};
use enrich_model::EnrichedEvent;
use enrich_pipeline::{BadRowBuilder, EnrichmentPipeline, PipelineOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Wires source → decode → pipeline → sinks → checkpointer and owns the
/// concurrency, backpressure, and shutdown discipline around that pipe
/// (§4.9).
pub struct Runtime {
    pub max_record_size: usize,
    pub try_base64_decoding: bool,
    pub pipeline: Arc<EnrichmentPipeline>,
    pub good_sink: Arc<dyn AttributedSink>,
    pub pii_sink: Option<Arc<dyn AttributedSink>>,
    pub bad_sink: Arc<dyn ByteSink>,
    pub sequencer: Arc<CommitSequencer>,
    pub enrich_concurrency: usize,
    pub sink_concurrency: usize,
    pub shutdown_grace: Duration,
}

impl Runtime {
    /// Run until `cancel` fires once, then drain in-flight work, then
    /// return. A second cancel signal while draining forces an immediate
    /// return (§4.9 "Shutdown").
    pub async fn run(&self, mut source: Box<dyn ByteRecordSource>, cancel: CancellationToken) -> anyhow::Result<()> {
        let enrich_permits = Arc::new(Semaphore::new(self.enrich_concurrency));
        let sink_permits = Arc::new(Semaphore::new(self.sink_concurrency));
        let mut in_flight: Vec<JoinHandle<Result<(), EnrichError>>> = Vec::new();

        let intake_result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            let record = match source.next(&cancel).await {
                Ok(Some(record)) => record,
                Ok(None) => break Ok(()),
                Err(e) => {
                    error!(error = %e, "source read failed");
                    break Ok(());
                }
            };

            let permit = enrich_permits.clone().acquire_owned().await.expect("enrich semaphore closed");
            let handle = tokio::spawn(process_record(
                record,
                self.max_record_size,
                self.try_base64_decoding,
                self.pipeline.clone(),
                self.good_sink.clone(),
                self.pii_sink.clone(),
                self.bad_sink.clone(),
                self.sequencer.clone(),
                sink_permits.clone(),
                permit,
            ));
            in_flight.push(handle);

            if let Err(e) = reap_finished(&mut in_flight).await {
                error!(error = %e, "terminal sink failure; stopping runtime");
                cancel.cancel();
                break Err(e);
            }
        };

        info!(in_flight = in_flight.len(), "draining in-flight work before shutdown");
        let drain = async {
            let mut first_err = None;
            for handle in in_flight.drain(..) {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "terminal sink failure during drain");
                        first_err.get_or_insert(e);
                    }
                    Err(e) => error!(error = %e, "record processing task panicked"),
                }
            }
            first_err
        };
        let drain_result = tokio::select! {
            err = drain => err,
            _ = tokio::time::sleep(self.shutdown_grace) => {
                warn!("shutdown grace period elapsed with work still in flight");
                None
            }
        };

        intake_result?;
        if let Some(e) = drain_result {
            return Err(e.into());
        }
        Ok(())
    }
}

/// Removes and checks already-completed tasks without blocking on ones
/// still running, surfacing the first terminal failure it finds.
async fn reap_finished(in_flight: &mut Vec<JoinHandle<Result<(), EnrichError>>>) -> Result<(), EnrichError> {
    let mut i = 0;
    while i < in_flight.len() {
        if in_flight[i].is_finished() {
            let handle = in_flight.remove(i);
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(EnrichError::Other(e.into())),
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn process_record(
    record: enrich_core::Record,
    max_record_size: usize,
    try_base64_decoding: bool,
    pipeline: Arc<EnrichmentPipeline>,
    good_sink: Arc<dyn AttributedSink>,
    pii_sink: Option<Arc<dyn AttributedSink>>,
    bad_sink: Arc<dyn ByteSink>,
    sequencer: Arc<CommitSequencer>,
    sink_permits: Arc<Semaphore>,
    _enrich_permit: tokio::sync::OwnedSemaphorePermit,
) -> Result<(), EnrichError> {
    let meta = record.meta.clone();
    let payload = record.bytes.clone();

    let raw_events = match enrich_decode::decode(&record.bytes, max_record_size, try_base64_decoding) {
        Ok(events) => events,
        Err(e) => {
            let bad_row = BadRowBuilder::from_decode_error(&e, payload);
            sequencer.register(meta.clone(), record.ack_handle, 1).await;
            return write_bad(&bad_sink, &bad_row, &sequencer, &meta, &sink_permits).await;
        }
    };

    if raw_events.is_empty() {
        // Invariant 2 still requires the record to checkpoint.
        sequencer.register(meta, record.ack_handle, 0).await;
        return Ok(());
    }

    let outcomes: Vec<PipelineOutcome> = {
        let mut outcomes = Vec::with_capacity(raw_events.len());
        for raw in &raw_events {
            outcomes.push(pipeline.process(raw, &record.bytes).await);
        }
        outcomes
    };

    let expected_acks: usize = outcomes
        .iter()
        .map(|o| match o {
            PipelineOutcome::Good { pii_event, .. } if pii_event.is_some() && pii_sink.is_some() => 2,
            _ => 1,
        })
        .sum();

    sequencer.register(meta.clone(), record.ack_handle, expected_acks).await;

    for outcome in outcomes {
        match outcome {
            PipelineOutcome::Good { event, pii_event } => {
                write_good(&good_sink, &event, &sequencer, &meta, &sink_permits).await?;
                if let Some(pii_event) = pii_event {
                    if let Some(pii_sink) = &pii_sink {
                        write_good(pii_sink, &pii_event, &sequencer, &meta, &sink_permits).await?;
                    }
                    // No pii sink configured: the twin is dropped and its ack
                    // was never counted in `expected_acks` above.
                }
            }
            PipelineOutcome::Bad { bad_row } => {
                write_bad(&bad_sink, &bad_row, &sequencer, &meta, &sink_permits).await?;
            }
        }
    }
    Ok(())
}

/// A sink write failure is terminal (§7 item 6): acking anyway would
/// checkpoint a record whose output was never durably written, a silent
/// gap the caller cannot recover from. The caller stops the runtime.
async fn write_good(
    sink: &Arc<dyn AttributedSink>,
    event: &EnrichedEvent,
    sequencer: &Arc<CommitSequencer>,
    meta: &RecordMeta,
    sink_permits: &Arc<Semaphore>,
) -> Result<(), EnrichError> {
    let _permit = sink_permits.clone().acquire_owned().await.expect("sink semaphore closed");
    let bytes = match serde_json::to_vec(event) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to serialize enriched event");
            sequencer.ack(meta).await;
            return Ok(());
        }
    };
    let attributes = attribute_whitelist(event);
    match sink.write(bytes, attributes).await {
        Ok(_) => {
            sequencer.ack(meta).await;
            Ok(())
        }
        Err(e) => Err(EnrichError::SinkFailure(format!("good sink write failed: {e}"))),
    }
}

async fn write_bad(
    sink: &Arc<dyn ByteSink>,
    bad_row: &enrich_model::BadRow,
    sequencer: &Arc<CommitSequencer>,
    meta: &RecordMeta,
    sink_permits: &Arc<Semaphore>,
) -> Result<(), EnrichError> {
    let _permit = sink_permits.clone().acquire_owned().await.expect("sink semaphore closed");
    match sink.write(bad_row.to_bytes()).await {
        Ok(_) => {
            sequencer.ack(meta).await;
            Ok(())
        }
        Err(e) => Err(EnrichError::SinkFailure(format!("bad sink write failed: {e}"))),
    }
}

/// Attribute keys drawn from a fixed whitelist of EnrichedEvent fields
/// (§6 "Output (good/pii) record"); a deployment-configurable whitelist is
/// future work, tracked as an Open Question in `DESIGN.md`.
fn attribute_whitelist(event: &EnrichedEvent) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    if let Some(app_id) = &event.app_id {
        attrs.insert("app_id".to_string(), app_id.clone());
    }
    if let Some(platform) = &event.platform {
        attrs.insert("platform".to_string(), platform.clone());
    }
    attrs.insert("event_id".to_string(), event.event_id.clone());
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_sequencer::CommitSequencer;
    use enrich_core::config::FeatureFlags;
    use enrich_io::{ChannelCheckpointer, FileSource, NullSink};
    use enrich_pipeline::{EnrichmentPipeline, SchemaValidator, StaticResolver, ATOMIC_EVENT_SCHEMA_KEY};
    use enrich_registry::{EnrichmentRegistry, PauseGate, Registry};

    fn tp2_line(body: &serde_json::Value) -> String {
        serde_json::json!({
            "schema": "iglu:com.snowplowanalytics.snowplow/CollectorPayload/thrift/1-0-0",
            "ipAddress": "127.0.0.1",
            "timestamp": 1_700_000_000_000i64,
            "collector": "enrich-test",
            "userAgent": "test-agent",
            "path": "/com.snowplowanalytics.snowplow/tp2",
            "body": body.to_string(),
            "contentType": "application/json",
        })
        .to_string()
    }

    fn empty_pipeline() -> EnrichmentPipeline {
        let registry = Arc::new(EnrichmentRegistry::new(Registry::empty()));
        let gate = Arc::new(PauseGate::new());
        gate.open();
        let mut schemas = std::collections::HashMap::new();
        schemas.insert(ATOMIC_EVENT_SCHEMA_KEY.to_string(), serde_json::json!({}));
        let validator = Arc::new(SchemaValidator::new(Box::new(StaticResolver::new(schemas))));
        EnrichmentPipeline::new(registry, gate, validator, FeatureFlags::default())
    }

    /// A file of two good records, one malformed record, and one
    /// zero-event record: good sink gets 2 writes, bad sink gets 1, and
    /// every one of the four source records still reaches the
    /// checkpointer (invariant 2, §8 "counts scenario" at small scale).
    #[tokio::test]
    async fn drives_mixed_records_to_the_right_sinks_and_checkpoints_all_of_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.ndjson");
        let lines = vec![
            tp2_line(&serde_json::json!([{"e": "pv", "aid": "app1"}])),
            tp2_line(&serde_json::json!([{"e": "se", "aid": "app1"}])),
            "not json at all".to_string(),
            tp2_line(&serde_json::json!([])),
        ]
        .join("\n");
        tokio::fs::write(&path, lines).await.unwrap();

        let good_sink = Arc::new(NullSink::new());
        let bad_sink = Arc::new(NullSink::new());
        let checkpointer = Arc::new(ChannelCheckpointer::new());
        let sequencer = Arc::new(CommitSequencer::new(checkpointer.clone()));

        let runtime = Runtime {
            max_record_size: 1_000_000,
            try_base64_decoding: false,
            pipeline: Arc::new(empty_pipeline()),
            good_sink: good_sink.clone(),
            pii_sink: None,
            bad_sink: bad_sink.clone(),
            sequencer,
            enrich_concurrency: 4,
            sink_concurrency: 4,
            shutdown_grace: Duration::from_secs(5),
        };

        let source = Box::new(FileSource::open(&path).await.unwrap());
        let cancel = CancellationToken::new();
        runtime.run(source, cancel).await.unwrap();

        assert_eq!(good_sink.count(), 2);
        assert_eq!(bad_sink.count(), 1);
        assert_eq!(checkpointer.committed_through(), 4);
    }
}
