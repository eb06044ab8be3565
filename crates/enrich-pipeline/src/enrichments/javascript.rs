use async_trait::async_trait;
use enrich_core::{Enrichment, EnrichmentFailure, EnrichmentOutcome};
use enrich_model::{EnrichedEvent, RawEvent, SelfDescribingJson};

const JAVASCRIPT_CONTEXT_SCHEMA: &str = "iglu:com.enrich/javascript_context/jsonschema/1-0-0";

/// Runs a configured script against each event's parameters.
///
/// An embedded JS engine is an external collaborator (§1 "individual
/// enrichment implementations ... out of scope"); this evaluates a small,
/// fixed rule language instead of shelling out to a real interpreter —
/// `return {"k": "$param"};` templates produce a context object by
/// substituting `$name` tokens with raw event parameters. Documented in
/// `DESIGN.md` as the scope this crate actually covers for this kind.
pub struct JavascriptEnrichment {
    id: String,
    script: String,
}

impl JavascriptEnrichment {
    pub fn new(id: String, script: String) -> Self {
        Self { id, script }
    }
}

fn substitute_params(template: &str, raw: &RawEvent) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(raw.param(&name).unwrap_or(""));
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl Enrichment for JavascriptEnrichment {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, raw: &RawEvent, _partial: &EnrichedEvent) -> Result<EnrichmentOutcome, EnrichmentFailure> {
        let body = self.script.trim_start_matches("return").trim().trim_end_matches(';').trim();
        let rendered = substitute_params(body, raw);
        let data: serde_json::Value = serde_json::from_str(&rendered).map_err(|e| EnrichmentFailure::InvalidInput {
            enrichment: self.id.clone(),
            message: format!("script did not render valid JSON: {e}"),
        })?;

        Ok(EnrichmentOutcome::empty().with_context(SelfDescribingJson::new(JAVASCRIPT_CONTEXT_SCHEMA, data)))
    }
}
