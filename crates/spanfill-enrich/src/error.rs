//! Error types for trace group enrichment

use std::time::Duration;
use thiserror::Error;

/// A batched trace group lookup failed as a whole.
///
/// There is no partial variant carrying hits: a partially answered
/// lookup is indistinguishable from "not found" and is reported here.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Network/HTTP transport error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Document store answered with a non-success status
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Response body could not be understood
    #[error("Malformed search response: {0}")]
    Protocol(String),

    /// Document store answered but not every shard did
    #[error("Partial search response: timed_out={timed_out}, failed_shards={failed_shards}")]
    PartialResponse { timed_out: bool, failed_shards: u64 },

    /// More documents matched than the store returned
    #[error("Truncated search response: {returned} of {total} matching hits returned")]
    TruncatedHits { returned: usize, total: u64 },

    /// Lookup did not complete in time
    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),

    /// Client has been closed
    #[error("Search client is closed")]
    Closed,
}

impl LookupError {
    /// Whether the same lookup could succeed if redelivered later
    pub fn is_transient(&self) -> bool {
        match self {
            LookupError::Network(_)
            | LookupError::PartialResponse { .. }
            | LookupError::Timeout(_) => true,
            LookupError::Server { status, .. } => *status >= 500 || *status == 429,
            LookupError::Protocol(_)
            | LookupError::TruncatedHits { .. }
            | LookupError::Closed => false,
        }
    }

    /// Create a server error from status and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        LookupError::Server {
            status,
            message: message.into(),
        }
    }
}

/// Result type for lookups
pub type LookupResult<T> = Result<T, LookupError>;

/// A record eligible for enrichment carries no usable trace id.
///
/// This points at the upstream decoder, not at the lookup path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    #[error("Record {record_id} has no '{field}' field")]
    MissingCorrelationId { record_id: String, field: String },

    #[error("Record {record_id} has an invalid '{field}' field: expected a non-empty string, found {found}")]
    InvalidCorrelationId {
        record_id: String,
        field: String,
        found: &'static str,
    },
}
