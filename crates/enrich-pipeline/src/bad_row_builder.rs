use enrich_core::EnrichmentFailure;
use enrich_decode::DecodeError;
use enrich_model::{BadRow, BadRowSchema, FailureMessage};

use crate::schema_validator::SchemaFailure;

/// Constructs canonical [`BadRow`]s from the failure kinds the pipeline
/// actually produces (§4.8, §7). Stateless — the schema key and payload
/// rendering are the only per-class decisions it makes.
pub struct BadRowBuilder;

impl BadRowBuilder {
    pub fn from_decode_error(err: &DecodeError, payload: Vec<u8>) -> BadRow {
        match err {
            DecodeError::SizeViolation { actual, max, preview } => BadRow::new(
                BadRowSchema::SizeViolation,
                vec![FailureMessage {
                    message: format!("payload of {actual} bytes exceeds max record size {max}"),
                    field: None,
                }],
                preview.clone().into_bytes(),
            ),
            DecodeError::AdapterFailure(message) => {
                BadRow::message(BadRowSchema::AdapterFailure, message.clone(), payload)
            }
        }
    }

    pub fn from_enrichment_failures(failures: &[EnrichmentFailure], payload: Vec<u8>) -> BadRow {
        let messages = failures
            .iter()
            .map(|f| FailureMessage {
                message: f.to_string(),
                field: None,
            })
            .collect();
        BadRow::new(BadRowSchema::EnrichmentFailure, messages, payload)
    }

    pub fn from_schema_failures(failures: &[SchemaFailure], payload: Vec<u8>) -> BadRow {
        let messages = failures
            .iter()
            .map(|f| FailureMessage {
                message: f.to_string(),
                field: None,
            })
            .collect();
        BadRow::new(BadRowSchema::SchemaViolation, messages, payload)
    }

    /// Composite failure: both enrichment and schema failures occurred for
    /// the same event (§4.6 step 7: "schema failures take precedence; both
    /// classes may be combined under a composite schema").
    pub fn from_combined(
        enrichment_failures: &[EnrichmentFailure],
        schema_failures: &[SchemaFailure],
        payload: Vec<u8>,
    ) -> BadRow {
        if schema_failures.is_empty() {
            return Self::from_enrichment_failures(enrichment_failures, payload);
        }
        let mut messages: Vec<FailureMessage> = schema_failures
            .iter()
            .map(|f| FailureMessage {
                message: f.to_string(),
                field: None,
            })
            .collect();
        messages.extend(enrichment_failures.iter().map(|f| FailureMessage {
            message: f.to_string(),
            field: None,
        }));
        BadRow::new(BadRowSchema::SchemaViolation, messages, payload)
    }

    pub fn generic(message: impl Into<String>, payload: Vec<u8>) -> BadRow {
        BadRow::message(BadRowSchema::Generic, message, payload)
    }
}
