use crate::{PROCESSOR_ARTIFACT, PROCESSOR_VERSION};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The fixed table of failure classes a bad row can belong to (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRowSchema {
    AdapterFailure,
    SizeViolation,
    EnrichmentFailure,
    SchemaViolation,
    Generic,
}

impl BadRowSchema {
    /// Iglu-shaped schema key used as the `schema` field of the bad row's
    /// self-describing envelope. The registry transport itself is out of
    /// scope (§1); these keys are stable identifiers other systems key
    /// failure dashboards on.
    pub fn schema_key(self) -> &'static str {
        match self {
            BadRowSchema::AdapterFailure => "iglu:com.enrich/adapter_failure/jsonschema/1-0-0",
            BadRowSchema::SizeViolation => "iglu:com.enrich/size_violation/jsonschema/1-0-0",
            BadRowSchema::EnrichmentFailure => "iglu:com.enrich/enrichment_failure/jsonschema/1-0-0",
            BadRowSchema::SchemaViolation => "iglu:com.enrich/schema_violation/jsonschema/1-0-0",
            BadRowSchema::Generic => "iglu:com.enrich/generic_error/jsonschema/1-0-0",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processor {
    pub artifact: String,
    pub version: String,
}

impl Default for Processor {
    fn default() -> Self {
        Self {
            artifact: PROCESSOR_ARTIFACT.to_string(),
            version: PROCESSOR_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub timestamp: String,
    pub messages: Vec<FailureMessage>,
}

/// A self-describing JSON failure record emitted to the bad sink.
///
/// Always carries `processor`, `failure`, and the original `payload`
/// (base64-encoded when binary, raw string otherwise) per §4.8.
#[derive(Debug, Clone)]
pub struct BadRow {
    pub schema: BadRowSchema,
    pub processor: Processor,
    pub failure: FailureDetail,
    pub payload: Vec<u8>,
    pub payload_is_text: bool,
}

impl BadRow {
    pub fn new(schema: BadRowSchema, messages: Vec<FailureMessage>, payload: Vec<u8>) -> Self {
        Self {
            schema,
            processor: Processor::default(),
            failure: FailureDetail {
                timestamp: chrono::Utc::now().to_rfc3339(),
                messages,
            },
            payload_is_text: std::str::from_utf8(&payload).is_ok(),
            payload,
        }
    }

    pub fn message(schema: BadRowSchema, message: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(
            schema,
            vec![FailureMessage {
                message: message.into(),
                field: None,
            }],
            payload,
        )
    }

    /// Render as the canonical `{schema, data}` self-describing envelope.
    pub fn to_json(&self) -> Value {
        let payload_value: Value = if self.payload_is_text {
            Value::String(String::from_utf8_lossy(&self.payload).into_owned())
        } else {
            Value::String(base64::engine::general_purpose::STANDARD.encode(&self.payload))
        };
        json!({
            "schema": self.schema.schema_key(),
            "data": {
                "processor": self.processor,
                "failure": self.failure,
                "payload": payload_value,
            }
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8's bad-row round-trip property: whatever bytes went in as
    /// `payload` come back out of the envelope unchanged, whether or not
    /// they happen to decode as UTF-8 text.
    #[test]
    fn valid_utf8_payload_round_trips_as_a_plain_string() {
        let original = b"not json at all".to_vec();
        let bad_row = BadRow::message(BadRowSchema::Generic, "malformed", original.clone());
        assert!(bad_row.payload_is_text);

        let payload = bad_row.to_json()["data"]["payload"].as_str().unwrap().to_string();
        assert_eq!(payload.into_bytes(), original);
    }

    #[test]
    fn non_utf8_payload_round_trips_through_base64() {
        let original: Vec<u8> = vec![0xff, 0xfe, 0x00, 0x9c, 0x80, 0x81];
        assert!(std::str::from_utf8(&original).is_err());

        let bad_row = BadRow::message(BadRowSchema::SizeViolation, "too large", original.clone());
        assert!(!bad_row.payload_is_text);

        let encoded = bad_row.to_json()["data"]["payload"].as_str().unwrap().to_string();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
