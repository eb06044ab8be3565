use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-describing JSON entity: `{schema, data}`.
///
/// Used both for derived contexts appended by enrichments and for the
/// top-level envelope of a [`crate::BadRow`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfDescribingJson {
    pub schema: String,
    pub data: Value,
}

impl SelfDescribingJson {
    pub fn new(schema: impl Into<String>, data: Value) -> Self {
        Self {
            schema: schema.into(),
            data,
        }
    }
}
