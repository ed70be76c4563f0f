//! Search gateway - one batched trace group lookup per call

use crate::client::{SearchClient, SearchRequest};
use crate::error::{LookupError, LookupResult};
use crate::fields::SpanFieldAccessor;
use spanfill_core::config::TraceGroupSettings;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trace id → trace group, for the ids the store knew about
pub type TraceGroupMap = HashMap<String, String>;

/// Owns the search client and turns id sets into trace group maps
pub struct SearchGateway {
    client: Arc<dyn SearchClient>,
    fields: SpanFieldAccessor,
    index: String,
    max_hits: usize,
    root_span_field: Option<String>,
    timeout: Duration,
}

impl SearchGateway {
    pub fn new(client: Arc<dyn SearchClient>, settings: &TraceGroupSettings) -> Self {
        Self {
            client,
            fields: SpanFieldAccessor::new(
                settings.trace_id_field.clone(),
                settings.trace_group_field.clone(),
            ),
            index: settings.index.clone(),
            max_hits: settings.max_hits.max(1),
            root_span_field: settings
                .root_spans_only
                .then(|| settings.parent_span_id_field.clone()),
            timeout: settings.request_timeout(),
        }
    }

    /// Look up the trace groups of `trace_ids` with a single search.
    ///
    /// Ids the store has no group for are simply absent from the map.
    /// When several hits carry the same id, the last one wins. Any failure,
    /// including a timeout, fails the lookup as a whole.
    pub async fn lookup(&self, trace_ids: &BTreeSet<String>) -> LookupResult<TraceGroupMap> {
        if trace_ids.is_empty() {
            return Ok(TraceGroupMap::new());
        }

        let request = self.build_request(trace_ids);
        let hits = tokio::time::timeout(self.timeout, self.client.search(&request))
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))??;

        let id_field = self.fields.trace_id_field();
        let group_field = self.fields.trace_group_field();

        let mut groups = TraceGroupMap::with_capacity(hits.len());
        let mut skipped = 0usize;
        for hit in &hits {
            match (hit.field_str(id_field), hit.field_str(group_field)) {
                (Some(id), Some(group)) if !group.is_empty() && trace_ids.contains(id) => {
                    groups.insert(id.to_string(), group.to_string());
                }
                _ => skipped += 1,
            }
        }

        debug!(
            "Lookup of {} trace ids returned {} hits, {} groups, {} unusable",
            trace_ids.len(),
            hits.len(),
            groups.len(),
            skipped
        );

        Ok(groups)
    }

    /// Release the underlying client
    pub fn close(&self) -> LookupResult<()> {
        self.client.close()
    }

    fn build_request(&self, trace_ids: &BTreeSet<String>) -> SearchRequest {
        let size = match self.root_span_field {
            // One root span per trace
            Some(_) => trace_ids.len(),
            None => self.max_hits,
        };

        SearchRequest {
            index: self.index.clone(),
            trace_id_field: self.fields.trace_id_field().to_string(),
            trace_group_field: self.fields.trace_group_field().to_string(),
            trace_ids: trace_ids.iter().cloned().collect(),
            size,
            root_span_field: self.root_span_field.clone(),
        }
    }
}
