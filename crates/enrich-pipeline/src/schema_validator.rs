use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Outcome of resolving a schema document (§6 "Schema resolver").
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Found(Value),
    NotFound,
    TransportError(String),
}

/// Fetches schema documents by key. Iglu transport itself is out of scope
/// (§1); production builds point this at a real registry client, tests and
/// local runs at an in-memory table loaded from `--iglu`.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, schema_key: &str) -> ResolveOutcome;
}

/// An in-memory resolver backed by a fixed table, for tests and the
/// `--iglu` static-file mode (§1: "resolve(schema_key) -> schema_doc |
/// NotFound" contract, transport unspecified).
pub struct StaticResolver {
    schemas: std::collections::HashMap<String, Value>,
}

impl StaticResolver {
    pub fn new(schemas: std::collections::HashMap<String, Value>) -> Self {
        Self { schemas }
    }

    pub fn empty() -> Self {
        Self::new(std::collections::HashMap::new())
    }
}

#[async_trait]
impl SchemaResolver for StaticResolver {
    async fn resolve(&self, schema_key: &str) -> ResolveOutcome {
        match self.schemas.get(schema_key) {
            Some(doc) => ResolveOutcome::Found(doc.clone()),
            None => ResolveOutcome::NotFound,
        }
    }
}

/// Why a validation attempt failed (§4.7, §7 items 4-5).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaFailure {
    #[error("schema not found: {0}")]
    NotFound(String),

    #[error("schema resolution failed after retries: {0}")]
    ResolutionError(String),

    #[error("data does not match schema {schema}: {message}")]
    Invalid { schema: String, message: String },
}

const VALIDATION_CACHE_CAPACITY: usize = 10_000;
const SCHEMA_CACHE_CAPACITY: usize = 1_000;
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const BACKOFF_FACTOR: u32 = 2;

/// Given an event's data and a schema key, fetches the schema via a
/// resolver and validates, caching both schema documents and recent
/// validation outcomes (§4.7).
pub struct SchemaValidator {
    resolver: Box<dyn SchemaResolver>,
    schema_cache: Mutex<LruCache<String, Value>>,
    result_cache: Mutex<LruCache<(String, u64), Result<(), String>>>,
}

impl SchemaValidator {
    pub fn new(resolver: Box<dyn SchemaResolver>) -> Self {
        Self {
            resolver,
            schema_cache: Mutex::new(LruCache::new(NonZeroUsize::new(SCHEMA_CACHE_CAPACITY).unwrap())),
            result_cache: Mutex::new(LruCache::new(NonZeroUsize::new(VALIDATION_CACHE_CAPACITY).unwrap())),
        }
    }

    pub async fn validate(&self, schema_key: &str, data: &Value) -> Result<(), SchemaFailure> {
        let data_hash = hash_value(data);
        let cache_key = (schema_key.to_string(), data_hash);
        if let Some(cached) = self.result_cache.lock().unwrap().get(&cache_key).cloned() {
            return cached.map_err(|message| SchemaFailure::Invalid {
                schema: schema_key.to_string(),
                message,
            });
        }

        let schema = self.resolve_with_retry(schema_key).await?;
        let result = validate_against_schema(&schema, data);

        self.result_cache.lock().unwrap().put(
            cache_key,
            result.clone().map_err(|f| match f {
                SchemaFailure::Invalid { message, .. } => message,
                other => other.to_string(),
            }),
        );

        result
    }

    async fn resolve_with_retry(&self, schema_key: &str) -> Result<Value, SchemaFailure> {
        if let Some(doc) = self.schema_cache.lock().unwrap().get(schema_key).cloned() {
            return Ok(doc);
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();
        for attempt in 0..MAX_RETRIES {
            match self.resolver.resolve(schema_key).await {
                ResolveOutcome::Found(doc) => {
                    self.schema_cache.lock().unwrap().put(schema_key.to_string(), doc.clone());
                    return Ok(doc);
                }
                ResolveOutcome::NotFound => {
                    return Err(SchemaFailure::NotFound(schema_key.to_string()));
                }
                ResolveOutcome::TransportError(message) => {
                    last_error = message;
                    if attempt + 1 < MAX_RETRIES {
                        warn!(schema_key, attempt, %last_error, "schema resolution transport error; retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= BACKOFF_FACTOR;
                    }
                }
            }
        }
        metrics::counter!("enrich_schema_resolution_failures_total").increment(1);
        Err(SchemaFailure::ResolutionError(last_error))
    }
}

fn hash_value(value: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

/// A deliberately lightweight structural check: required top-level
/// properties present, and scalar types matching where the schema declares
/// them. Full JSON Schema compliance (nested `$ref`, `oneOf`, formats, ...)
/// is out of this crate's scope — see `DESIGN.md`.
fn validate_against_schema(schema: &Value, data: &Value) -> Result<(), SchemaFailure> {
    let schema_title = schema
        .get("self")
        .and_then(|s| s.get("name"))
        .or_else(|| schema.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let Some(data_obj) = data.as_object() else {
        return Err(SchemaFailure::Invalid {
            schema: schema_title,
            message: "data is not a JSON object".to_string(),
        });
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !data_obj.contains_key(name) {
                return Err(SchemaFailure::Invalid {
                    schema: schema_title,
                    message: format!("missing required field '{name}'"),
                });
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in properties {
            let (Some(value), Some(expected_type)) =
                (data_obj.get(name), prop_schema.get("type").and_then(Value::as_str))
            else {
                continue;
            };
            if !type_matches(value, expected_type) {
                return Err(SchemaFailure::Invalid {
                    schema: schema_title,
                    message: format!("field '{name}' expected type '{expected_type}'"),
                });
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver_with(schema_key: &str, doc: Value) -> StaticResolver {
        let mut map = std::collections::HashMap::new();
        map.insert(schema_key.to_string(), doc);
        StaticResolver::new(map)
    }

    #[tokio::test]
    async fn valid_data_passes() {
        let schema = json!({"required": ["a"], "properties": {"a": {"type": "string"}}});
        let validator = SchemaValidator::new(Box::new(resolver_with("s1", schema)));
        assert!(validator.validate("s1", &json!({"a": "x"})).await.is_ok());
    }

    #[tokio::test]
    async fn missing_required_field_fails() {
        let schema = json!({"required": ["a"]});
        let validator = SchemaValidator::new(Box::new(resolver_with("s1", schema)));
        let err = validator.validate("s1", &json!({})).await.unwrap_err();
        assert!(matches!(err, SchemaFailure::Invalid { .. }));
    }

    #[tokio::test]
    async fn unknown_schema_is_not_found() {
        let validator = SchemaValidator::new(Box::new(StaticResolver::empty()));
        let err = validator.validate("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, SchemaFailure::NotFound(_)));
    }

    #[tokio::test]
    async fn repeated_validation_hits_cache() {
        let schema = json!({"required": ["a"]});
        let validator = SchemaValidator::new(Box::new(resolver_with("s1", schema)));
        let data = json!({"a": 1});
        assert!(validator.validate("s1", &data).await.is_ok());
        assert!(validator.validate("s1", &data).await.is_ok());
    }
}
