//! Trace group enrichment processor
//!
//! Fills in the trace group of spans that arrive without one by looking
//! the trace id up in the span index. Lookups are batched: one search per
//! `process` call, covering every distinct trace id in the batch that
//! still needs a group. Enrichment is best effort. Whatever goes wrong,
//! the batch comes back with the same records in the same order.

use crate::client::SearchClient;
use crate::fields::SpanFieldAccessor;
use crate::gateway::SearchGateway;
use crate::opensearch::OpenSearchClient;
use async_trait::async_trait;
use spanfill_core::config::TraceGroupSettings;
use spanfill_core::metrics::EnrichmentMetrics;
use spanfill_core::plugins::{Plugin, PluginError, PluginInfo, PluginResult, ProcessorPlugin};
use spanfill_core::record::Record;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backfills missing trace groups from the span index
pub struct TraceGroupProcessor {
    fields: SpanFieldAccessor,
    gateway: SearchGateway,
    shut_down: AtomicBool,
    metrics: Arc<EnrichmentMetrics>,
}

impl TraceGroupProcessor {
    /// Create a processor backed by an OpenSearch client for `settings`
    pub fn new(settings: &TraceGroupSettings) -> PluginResult<Self> {
        let client = OpenSearchClient::new(settings).map_err(|e| {
            PluginError::InitializationFailed(format!("Failed to create search client: {}", e))
        })?;
        Ok(Self::with_client(settings, Arc::new(client)))
    }

    /// Create a processor backed by an existing search client
    pub fn with_client(settings: &TraceGroupSettings, client: Arc<dyn SearchClient>) -> Self {
        info!(
            "Trace group processor initialized: index={}, trace_id_field={}, trace_group_field={}",
            settings.index, settings.trace_id_field, settings.trace_group_field
        );

        Self {
            fields: SpanFieldAccessor::new(
                settings.trace_id_field.clone(),
                settings.trace_group_field.clone(),
            ),
            gateway: SearchGateway::new(client, settings),
            shut_down: AtomicBool::new(false),
            metrics: Arc::new(EnrichmentMetrics::default()),
        }
    }

    /// Report into shared counters instead of private ones
    pub fn with_metrics(mut self, metrics: Arc<EnrichmentMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Counters for this processor
    pub fn metrics(&self) -> &EnrichmentMetrics {
        &self.metrics
    }

    /// Whether `shutdown` has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Enrich a batch. Never fails and never drops, adds or reorders
    /// records: output position `i` holds input record `i`, possibly with
    /// its trace group filled in.
    pub async fn enrich(&self, records: Vec<Record>) -> Vec<Record> {
        let m = &self.metrics;
        m.records_in.fetch_add(records.len() as u64, Ordering::Relaxed);

        if self.is_shut_down() {
            warn!(
                "Trace group processor is shut down; passing {} records through",
                records.len()
            );
            return records;
        }

        // Trace id to look up for each position, None if not eligible
        let mut pending: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut trace_ids = BTreeSet::new();
        let mut complete = 0u64;

        for record in &records {
            if self.fields.is_group_present(record) {
                complete += 1;
                pending.push(None);
                continue;
            }

            match self.fields.correlation_id_of(record) {
                Ok(id) => {
                    trace_ids.insert(id.to_string());
                    pending.push(Some(id.to_string()));
                }
                Err(e) => {
                    m.malformed_records.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping trace group lookup for malformed record: {}", e);
                    pending.push(None);
                }
            }
        }
        m.records_already_complete.fetch_add(complete, Ordering::Relaxed);

        if trace_ids.is_empty() {
            return records;
        }

        m.lookups.fetch_add(1, Ordering::Relaxed);
        let groups = match self.gateway.lookup(&trace_ids).await {
            Ok(groups) => groups,
            Err(e) => {
                m.lookup_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Trace group lookup for {} trace ids failed (transient={}), passing batch through: {}",
                    trace_ids.len(),
                    e.is_transient(),
                    e
                );
                return records;
            }
        };

        let mut enriched = 0u64;
        let mut unmatched = 0u64;
        let output: Vec<Record> = records
            .into_iter()
            .zip(pending)
            .map(|(record, trace_id)| {
                let Some(trace_id) = trace_id else {
                    return record;
                };
                match groups.get(&trace_id) {
                    Some(group) => {
                        enriched += 1;
                        self.fields.with_group_label(record, group)
                    }
                    None => {
                        unmatched += 1;
                        record
                    }
                }
            })
            .collect();

        m.records_enriched.fetch_add(enriched, Ordering::Relaxed);
        m.records_unmatched.fetch_add(unmatched, Ordering::Relaxed);
        debug!(
            "Trace group enrichment: {} enriched, {} without a known group",
            enriched, unmatched
        );

        output
    }

    /// Close the search client. Only the first call closes it; later
    /// calls, from any thread, return immediately.
    pub fn close(&self) {
        if self
            .shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Trace group processor already shut down");
            return;
        }

        match self.gateway.close() {
            Ok(()) => info!("Trace group processor shut down"),
            Err(e) => warn!("Error closing search client: {}", e),
        }
    }
}

impl PluginInfo for TraceGroupProcessor {
    fn name(&self) -> &str {
        "otel-trace-group"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Fills in missing span trace groups from the span index"
    }
}

impl Plugin for TraceGroupProcessor {
    fn shutdown(&self) -> PluginResult<()> {
        self.close();
        Ok(())
    }
}

#[async_trait]
impl ProcessorPlugin for TraceGroupProcessor {
    async fn process(&self, records: Vec<Record>) -> Vec<Record> {
        self.enrich(records).await
    }
}
