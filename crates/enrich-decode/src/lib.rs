//! # Enrich Decode
//!
//! Turns source record payload bytes into zero or more [`RawEvent`]s
//! (§4.2). Pure and thread-safe: no I/O, no shared state, safe to call
//! concurrently from every pipeline worker.
//!
//! The wire envelope this decoder parses is a JSON rendering of the
//! canonical collector payload (fields named after the tracker protocol's
//! Thrift schema). Real Thrift framing is an external-collaborator detail
//! per the specification's scope (§1 lists collector payload transport as
//! out of scope beyond "decode into raw events"); see `DESIGN.md` for why
//! JSON stands in for it here.

use base64::Engine;
use enrich_model::{CollectorPayload, RawEvent};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Failure classes the decoder can produce (§7 items 1-2).
#[derive(Debug, Error, Clone)]
pub enum DecodeError {
    #[error("payload of {actual} bytes exceeds max record size {max}")]
    SizeViolation { actual: usize, max: usize, preview: String },

    #[error("malformed collector payload: {0}")]
    AdapterFailure(String),
}

#[derive(Debug, Deserialize)]
struct CollectorPayloadWire {
    schema: String,
    #[serde(rename = "ipAddress")]
    ip_address: Option<String>,
    timestamp: Option<i64>,
    encoding: Option<String>,
    collector: Option<String>,
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    #[serde(rename = "refererUri")]
    referer_uri: Option<String>,
    #[serde(default)]
    path: String,
    querystring: Option<String>,
    body: Option<String>,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    hostname: Option<String>,
    #[serde(rename = "networkUserId")]
    network_user_id: Option<String>,
}

const TRUNCATED_PREVIEW_LEN: usize = 256;

fn preview(bytes: &[u8]) -> String {
    let take = bytes.len().min(TRUNCATED_PREVIEW_LEN);
    String::from_utf8_lossy(&bytes[..take]).into_owned()
}

/// Decode one source record's payload bytes into its constituent raw
/// events. A decode failure (including the size-violation case) is
/// returned as a value, never a panic — callers turn it into exactly one
/// bad row.
pub fn decode(
    bytes: &[u8],
    max_record_size: usize,
    try_base64_decoding: bool,
) -> Result<Vec<RawEvent>, DecodeError> {
    if bytes.len() > max_record_size {
        return Err(DecodeError::SizeViolation {
            actual: bytes.len(),
            max: max_record_size,
            preview: preview(bytes),
        });
    }

    let wire = parse_wire(bytes, try_base64_decoding)?;
    let payload = to_collector_payload(wire);
    Ok(expand(&payload))
}

fn parse_wire(bytes: &[u8], try_base64_decoding: bool) -> Result<CollectorPayloadWire, DecodeError> {
    match serde_json::from_slice::<CollectorPayloadWire>(bytes) {
        Ok(wire) => Ok(wire),
        Err(direct_err) => {
            if try_base64_decoding {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(bytes)
                    .map_err(|e| DecodeError::AdapterFailure(format!("base64: {e}")))?;
                serde_json::from_slice::<CollectorPayloadWire>(&decoded)
                    .map_err(|e| DecodeError::AdapterFailure(format!("json: {e}")))
            } else {
                Err(DecodeError::AdapterFailure(format!("json: {direct_err}")))
            }
        }
    }
}

fn to_collector_payload(wire: CollectorPayloadWire) -> CollectorPayload {
    CollectorPayload {
        api_schema: wire.schema,
        ip_address: wire.ip_address,
        timestamp_ms: wire.timestamp.unwrap_or(0),
        encoding: wire.encoding,
        collector: wire.collector,
        user_agent: wire.user_agent,
        referer_uri: wire.referer_uri,
        path: wire.path,
        querystring: wire.querystring,
        body: wire.body,
        headers: wire.headers,
        content_type: wire.content_type,
        hostname: wire.hostname,
        network_user_id: wire.network_user_id,
    }
}

/// Expand a decoded envelope into its constituent raw events. A POST body
/// carries a JSON array of parameter maps (tracker batching); a GET
/// querystring carries exactly one event's parameters. Both are supported;
/// neither present yields zero events (invariant 2: a decode success with
/// zero events is legal, the record still gets exactly one output overall
/// once the pipeline routes it downstream).
fn expand(payload: &CollectorPayload) -> Vec<RawEvent> {
    let mut out = Vec::new();

    if let Some(body) = &payload.body {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(body) {
            for item in items {
                if let serde_json::Value::Object(map) = item {
                    out.push(build_raw_event(payload, map_to_params(map)));
                }
            }
        }
    }

    if out.is_empty() {
        if let Some(qs) = &payload.querystring {
            let params = parse_querystring(qs);
            if !params.is_empty() {
                out.push(build_raw_event(payload, params));
            }
        }
    }

    out
}

fn map_to_params(map: serde_json::Map<String, serde_json::Value>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect()
}

fn parse_querystring(qs: &str) -> HashMap<String, String> {
    qs.trim_start_matches('?')
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((
                urldecode(key),
                urldecode(value),
            ))
        })
        .collect()
}

fn urldecode(s: &str) -> String {
    // Minimal percent-decoding; trackers only use it for a small alphabet
    // of reserved characters in practice.
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
                out.push('%');
            }
            other => out.push(other),
        }
    }
    out
}

fn build_raw_event(payload: &CollectorPayload, parameters: HashMap<String, String>) -> RawEvent {
    RawEvent {
        api_schema: payload.api_schema.clone(),
        parameters,
        collector_timestamp_ms: payload.timestamp_ms,
        collector: payload.collector.clone(),
        user_agent: payload.user_agent.clone(),
        ip_address: payload.ip_address.clone(),
        referer_uri: payload.referer_uri.clone(),
        hostname: payload.hostname.clone(),
        network_user_id: payload.network_user_id.clone(),
        headers: payload.headers.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(body: &str) -> Vec<u8> {
        serde_json::json!({
            "schema": "iglu:com.snowplowanalytics.snowplow/CollectorPayload/thrift/1-0-0",
            "ipAddress": "127.0.0.1",
            "timestamp": 1_700_000_000_000i64,
            "collector": "enrich-test",
            "userAgent": "test-agent",
            "path": "/com.snowplowanalytics.snowplow/tp2",
            "body": body,
            "contentType": "application/json",
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_batched_post_body_into_multiple_events() {
        let body = serde_json::json!([
            {"e": "pv", "tv": "js-3.0", "aid": "app1"},
            {"e": "se", "tv": "js-3.0", "aid": "app1"},
        ])
        .to_string();
        let events = decode(&wire(&body), 1_000_000, false).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].param("e"), Some("pv"));
        assert_eq!(events[1].param("e"), Some("se"));
    }

    #[test]
    fn zero_event_payload_decodes_to_empty_list() {
        let body = serde_json::json!([]).to_string();
        let events = decode(&wire(&body), 1_000_000, false).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn oversized_payload_is_size_violation() {
        let bytes = wire(&serde_json::json!([]).to_string());
        let err = decode(&bytes, bytes.len() - 1, false).unwrap_err();
        assert!(matches!(err, DecodeError::SizeViolation { .. }));
    }

    #[test]
    fn malformed_json_is_adapter_failure() {
        let err = decode(b"not json at all", 1_000_000, false).unwrap_err();
        assert!(matches!(err, DecodeError::AdapterFailure(_)));
    }

    #[test]
    fn base64_wrapped_payload_decodes_when_flag_set() {
        let raw = wire(&serde_json::json!([{"e": "pv"}]).to_string());
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);
        let events = decode(encoded.as_bytes(), 1_000_000, true).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn querystring_get_yields_single_event() {
        let bytes = serde_json::json!({
            "schema": "iglu:com.snowplowanalytics.snowplow/CollectorPayload/thrift/1-0-0",
            "path": "/i",
            "querystring": "e=pv&aid=app1",
        })
        .to_string()
        .into_bytes();
        let events = decode(&bytes, 1_000_000, false).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].param("aid"), Some("app1"));
    }
}
