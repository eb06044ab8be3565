use async_trait::async_trait;
use enrich_core::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
use enrich_model::{EnrichedEvent, RawEvent, SelfDescribingJson};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const YAUAA_CONTEXT_SCHEMA: &str = "iglu:com.enrich/ua_parser_context/jsonschema/1-0-0";

/// User-agent classification into browser/OS/device family.
///
/// A full UA-parsing ruleset (YAUAA's hundreds of regex-driven rules) is an
/// external collaborator (§1); this applies a small fixed set of substring
/// rules sufficient to exercise the enrichment contract, and caches results
/// per distinct UA string since the same string recurs across an event
/// stream far more than it varies.
pub struct YauaaEnrichment {
    id: String,
    cache: Mutex<LruCache<String, Classification>>,
}

#[derive(Debug, Clone)]
struct Classification {
    browser_family: String,
    os_family: String,
    device_family: String,
}

impl YauaaEnrichment {
    pub fn new(id: String, cache_size: usize) -> Self {
        Self {
            id,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_size.max(1)).unwrap())),
        }
    }

    fn classify(ua: &str) -> Classification {
        let lower = ua.to_ascii_lowercase();
        let browser_family = if lower.contains("firefox") {
            "Firefox"
        } else if lower.contains("edg/") {
            "Edge"
        } else if lower.contains("chrome") {
            "Chrome"
        } else if lower.contains("safari") {
            "Safari"
        } else {
            "Other"
        };
        let os_family = if lower.contains("windows") {
            "Windows"
        } else if lower.contains("mac os") || lower.contains("macos") {
            "macOS"
        } else if lower.contains("android") {
            "Android"
        } else if lower.contains("iphone") || lower.contains("ios") {
            "iOS"
        } else if lower.contains("linux") {
            "Linux"
        } else {
            "Other"
        };
        let device_family = if lower.contains("mobile") || lower.contains("android") || lower.contains("iphone") {
            "Mobile"
        } else {
            "Desktop"
        };

        Classification {
            browser_family: browser_family.to_string(),
            os_family: os_family.to_string(),
            device_family: device_family.to_string(),
        }
    }
}

#[async_trait]
impl Enrichment for YauaaEnrichment {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, raw: &RawEvent, _partial: &EnrichedEvent) -> Result<EnrichmentOutcome, EnrichmentFailure> {
        let Some(ua) = raw.user_agent.as_deref() else {
            return Ok(EnrichmentOutcome::empty());
        };
        if ua.trim().is_empty() {
            return Err(EnrichmentFailure::InvalidInput {
                enrichment: self.id.clone(),
                message: "empty user agent string".to_string(),
            });
        }

        let mut cache = self.cache.lock().expect("yauaa cache lock poisoned");
        let classification = cache.get_or_insert(ua.to_string(), || Self::classify(ua)).clone();
        drop(cache);

        Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(
            YAUAA_CONTEXT_SCHEMA,
            serde_json::json!({
                "browser_family": classification.browser_family,
                "os_family": classification.os_family,
                "device_family": classification.device_family,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw_with_ua(ua: &str) -> RawEvent {
        RawEvent {
            api_schema: "iglu:test/tp2".into(),
            parameters: HashMap::new(),
            collector_timestamp_ms: 0,
            collector: None,
            user_agent: Some(ua.to_string()),
            ip_address: None,
            referer_uri: None,
            hostname: None,
            network_user_id: None,
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn classifies_chrome_on_windows() {
        let enrichment = YauaaEnrichment::new("yauaa".into(), 10);
        let raw = raw_with_ua("Mozilla/5.0 (Windows NT 10.0) Chrome/100.0");
        let partial = EnrichedEvent::from_raw(&raw, "id".into());
        let outcome = enrichment.run(&raw, &partial).await.unwrap();
        assert_eq!(outcome.contexts[0].data["browser_family"], "Chrome");
        assert_eq!(outcome.contexts[0].data["os_family"], "Windows");
    }

    #[tokio::test]
    async fn empty_user_agent_is_invalid_input() {
        let enrichment = YauaaEnrichment::new("yauaa".into(), 10);
        let raw = raw_with_ua("");
        let partial = EnrichedEvent::from_raw(&raw, "id".into());
        let err = enrichment.run(&raw, &partial).await.unwrap_err();
        assert!(matches!(err, EnrichmentFailure::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn missing_user_agent_produces_no_context() {
        let enrichment = YauaaEnrichment::new("yauaa".into(), 10);
        let raw = RawEvent {
            api_schema: "iglu:test/tp2".into(),
            parameters: HashMap::new(),
            collector_timestamp_ms: 0,
            collector: None,
            user_agent: None,
            ip_address: None,
            referer_uri: None,
            hostname: None,
            network_user_id: None,
            headers: vec![],
        };
        let partial = EnrichedEvent::from_raw(&raw, "id".into());
        let outcome = enrichment.run(&raw, &partial).await.unwrap();
        assert!(outcome.contexts.is_empty());
    }
}
