//! Typed access to the trace id and trace group fields of a span record

use crate::error::MalformedRecordError;
use serde_json::Value;
use spanfill_core::record::{json_kind, Record};

/// Reads and writes the two span fields the enrichment cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanFieldAccessor {
    trace_id_field: String,
    trace_group_field: String,
}

impl SpanFieldAccessor {
    pub fn new(trace_id_field: impl Into<String>, trace_group_field: impl Into<String>) -> Self {
        Self {
            trace_id_field: trace_id_field.into(),
            trace_group_field: trace_group_field.into(),
        }
    }

    pub fn trace_id_field(&self) -> &str {
        &self.trace_id_field
    }

    pub fn trace_group_field(&self) -> &str {
        &self.trace_group_field
    }

    /// True iff the trace group is present and a non-empty string.
    ///
    /// Absent, null, empty and non-string values all count as missing.
    pub fn is_group_present(&self, record: &Record) -> bool {
        matches!(record.field(&self.trace_group_field), Some(Value::String(s)) if !s.is_empty())
    }

    /// The record's trace id
    pub fn correlation_id_of<'a>(&self, record: &'a Record) -> Result<&'a str, MalformedRecordError> {
        match record.field(&self.trace_id_field) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.as_str()),
            None | Some(Value::Null) => Err(MalformedRecordError::MissingCorrelationId {
                record_id: record.record_id.clone(),
                field: self.trace_id_field.clone(),
            }),
            Some(Value::String(_)) => Err(MalformedRecordError::InvalidCorrelationId {
                record_id: record.record_id.clone(),
                field: self.trace_id_field.clone(),
                found: "empty string",
            }),
            Some(other) => Err(MalformedRecordError::InvalidCorrelationId {
                record_id: record.record_id.clone(),
                field: self.trace_id_field.clone(),
                found: json_kind(other),
            }),
        }
    }

    /// The same record with its trace group set to `label`
    pub fn with_group_label(&self, mut record: Record, label: &str) -> Record {
        record
            .data
            .insert(self.trace_group_field.clone(), Value::String(label.to_string()));
        record
    }
}

impl Default for SpanFieldAccessor {
    fn default() -> Self {
        Self::new("traceId", "traceGroup")
    }
}
