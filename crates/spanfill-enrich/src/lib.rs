//! Trace group enrichment for spanfill
//!
//! Spans that reach the pipeline without a trace group get one from the
//! span index, looked up by trace id:
//! - [`SpanFieldAccessor`]: reads the trace id, checks and sets the group
//! - [`SearchGateway`]: one batched search per call, id set in, map out
//! - [`OpenSearchClient`]: the HTTP [`SearchClient`] against `_search`
//! - [`TraceGroupProcessor`]: the fail-open processor plugin tying them together

pub mod client;
pub mod error;
pub mod fields;
pub mod gateway;
pub mod opensearch;
pub mod processor;

#[cfg(test)]
mod testing;

pub use client::{SearchClient, SearchHit, SearchRequest};
pub use error::{LookupError, LookupResult, MalformedRecordError};
pub use fields::SpanFieldAccessor;
pub use gateway::{SearchGateway, TraceGroupMap};
pub use opensearch::OpenSearchClient;
pub use processor::TraceGroupProcessor;
