//! Search client abstraction
//!
//! The gateway talks to the document store through [`SearchClient`], so
//! the enrichment logic never depends on a particular wire client.
//! Implementations must be safe for concurrent use without external
//! locking: every worker shares one instance.

use crate::error::LookupResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

/// A batched "trace id is any of" query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Index or index pattern to search
    pub index: String,

    /// Field matched against `trace_ids`
    pub trace_id_field: String,

    /// Field that must exist on matching documents
    pub trace_group_field: String,

    /// Distinct trace ids to look up
    pub trace_ids: Vec<String>,

    /// Maximum number of hits to return
    pub size: usize,

    /// Restrict matches to documents whose given field is empty (root spans)
    pub root_span_field: Option<String>,
}

/// One matching document, restricted to the requested fields
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchHit {
    /// Doc-value fields; each value is an array
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Stored source, when the store returns it
    #[serde(default, rename = "_source")]
    pub source: Option<Map<String, Value>>,
}

impl SearchHit {
    /// Build a hit carrying the given doc-value fields
    pub fn with_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::Array(vec![Value::String(v.to_string())])))
                .collect(),
            source: None,
        }
    }

    /// First string value of `name`, from doc-value fields or the source
    pub fn field_str(&self, name: &str) -> Option<&str> {
        let from_fields = match self.fields.get(name) {
            Some(Value::Array(values)) => values.first().and_then(Value::as_str),
            Some(value) => value.as_str(),
            None => None,
        };

        from_fields.or_else(|| {
            self.source
                .as_ref()
                .and_then(|source| source.get(name))
                .and_then(Value::as_str)
        })
    }
}

/// Client able to run a [`SearchRequest`]
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run the request, returning every hit or failing as a whole
    async fn search(&self, request: &SearchRequest) -> LookupResult<Vec<SearchHit>>;

    /// Release the underlying connection. Must be safe to call on a
    /// client that was never used and on one that is already closed.
    fn close(&self) -> LookupResult<()>;
}
