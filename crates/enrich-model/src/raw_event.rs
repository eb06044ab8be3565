use std::collections::HashMap;

/// The unenriched per-event structure decoded from a [`crate::CollectorPayload`].
///
/// Mirrors the HTTP-form-like parameter map a tracker sends, plus the
/// envelope fields the collector stamped on at receipt time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Schema key identifying the collector API version (e.g. `iglu:.../tp2`).
    pub api_schema: String,
    /// Raw tracker parameters, e.g. `e`, `tv`, `p`, `uid`, ...
    pub parameters: HashMap<String, String>,

    // Envelope fields copied down from the CollectorPayload for this event.
    pub collector_timestamp_ms: i64,
    pub collector: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referer_uri: Option<String>,
    pub hostname: Option<String>,
    pub network_user_id: Option<String>,
    pub headers: Vec<String>,
}

impl RawEvent {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}
