/// Decoded form of a source record's payload bytes.
///
/// A single CollectorPayload may bundle several events (a tracker POST
/// batch) behind one set of envelope fields (timestamp, user agent, remote
/// IP, collector name). Decoding this into zero or more [`crate::RawEvent`]s
/// is [`enrich-decode`]'s job; this struct is the intermediate the decoder
/// produces on its way there.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorPayload {
    pub api_schema: String,
    pub ip_address: Option<String>,
    pub timestamp_ms: i64,
    pub encoding: Option<String>,
    pub collector: Option<String>,
    pub user_agent: Option<String>,
    pub referer_uri: Option<String>,
    pub path: String,
    pub querystring: Option<String>,
    pub body: Option<String>,
    pub headers: Vec<String>,
    pub content_type: Option<String>,
    pub hostname: Option<String>,
    pub network_user_id: Option<String>,
}
