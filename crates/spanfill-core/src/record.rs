//! Record envelope - the unit of data flowing through the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded span payload: a string-keyed JSON object
pub type SpanData = Map<String, Value>;

/// Pipeline envelope wrapping one decoded span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record identifier (ULID)
    pub record_id: String,

    /// When the record entered the pipeline
    pub received_at: DateTime<Utc>,

    /// Span fields
    pub data: SpanData,
}

impl Record {
    /// Wrap a decoded span in a fresh envelope
    pub fn new(data: SpanData) -> Self {
        Self {
            record_id: ulid::Ulid::new().to_string(),
            received_at: Utc::now(),
            data,
        }
    }

    /// Decode one JSON line into a record.
    ///
    /// Only JSON objects are accepted; arrays and scalars are rejected.
    pub fn from_json_line(line: &str) -> Result<Self, RecordDecodeError> {
        match serde_json::from_str::<Value>(line)? {
            Value::Object(data) => Ok(Self::new(data)),
            other => Err(RecordDecodeError::NotAnObject(json_kind(&other))),
        }
    }

    /// Look up a span field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Serialize the span payload (without the envelope) as a JSON line
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.data)
    }
}

/// Failure to decode a record from its serialized form
#[derive(Debug, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Short name of a JSON value's type, for diagnostics
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_line() {
        let record =
            Record::from_json_line(r#"{"traceId":"abc","name":"GET /"}"#).unwrap();
        assert_eq!(record.field("traceId"), Some(&json!("abc")));
        assert_eq!(record.field("name"), Some(&json!("GET /")));
        assert!(record.field("traceGroup").is_none());
        assert_eq!(record.record_id.len(), 26);
    }

    #[test]
    fn test_from_json_line_rejects_non_objects() {
        let err = Record::from_json_line("[1, 2]").unwrap_err();
        assert!(matches!(err, RecordDecodeError::NotAnObject("array")));

        let err = Record::from_json_line("not json").unwrap_err();
        assert!(matches!(err, RecordDecodeError::Json(_)));
    }

    #[test]
    fn test_to_json_line_omits_envelope() {
        let record = Record::from_json_line(r#"{"spanId":"s1"}"#).unwrap();
        let line = record.to_json_line().unwrap();
        assert_eq!(line, r#"{"spanId":"s1"}"#);
    }

    #[test]
    fn test_records_get_distinct_ids() {
        let a = Record::new(SpanData::new());
        let b = Record::new(SpanData::new());
        assert_ne!(a.record_id, b.record_id);
    }
}
