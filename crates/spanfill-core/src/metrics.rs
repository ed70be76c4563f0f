//! Counters for enrichment and pipeline throughput
//!
//! All counters are relaxed atomics: they are shared by every worker and
//! only ever read for reporting.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics shared by the pipeline and its processors
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    /// Trace group enrichment counters, shared with the processor
    pub enrichment: Arc<EnrichmentMetrics>,
    /// Batch pipeline counters
    pub pipeline: PipelineMetrics,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            enrichment: Arc::new(EnrichmentMetrics::default()),
            pipeline: PipelineMetrics::default(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        write_metric(
            &mut output,
            "spanfill_uptime_seconds",
            "Time since spanfill started",
            "gauge",
            self.uptime_seconds(),
        );

        let e = &self.enrichment;
        let counters = [
            ("spanfill_records_in_total", "Records seen by the trace group processor", &e.records_in),
            ("spanfill_records_enriched_total", "Records given a trace group", &e.records_enriched),
            ("spanfill_records_unmatched_total", "Records with no trace group in the store", &e.records_unmatched),
            ("spanfill_records_complete_total", "Records that already carried a trace group", &e.records_already_complete),
            ("spanfill_records_malformed_total", "Records missing a usable trace id", &e.malformed_records),
            ("spanfill_lookups_total", "Batched trace group lookups issued", &e.lookups),
            ("spanfill_lookup_failures_total", "Batched lookups that failed", &e.lookup_failures),
            ("spanfill_pipeline_batches_total", "Batches processed by the pipeline", &self.pipeline.batches),
            ("spanfill_pipeline_records_out_total", "Records handed to sinks", &self.pipeline.records_out),
            ("spanfill_pipeline_sink_errors_total", "Sink write failures", &self.pipeline.sink_errors),
        ];

        for (name, help, counter) in counters {
            write_metric(
                &mut output,
                name,
                help,
                "counter",
                counter.load(Ordering::Relaxed),
            );
        }

        output
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    // Writing to a String cannot fail
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}\n", name, value);
}

/// Trace group enrichment counters
#[derive(Debug, Default)]
pub struct EnrichmentMetrics {
    pub records_in: AtomicU64,
    pub records_enriched: AtomicU64,
    pub records_unmatched: AtomicU64,
    pub records_already_complete: AtomicU64,
    pub malformed_records: AtomicU64,
    pub lookups: AtomicU64,
    pub lookup_failures: AtomicU64,
}

impl EnrichmentMetrics {
    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> EnrichmentSnapshot {
        EnrichmentSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            records_enriched: self.records_enriched.load(Ordering::Relaxed),
            records_unmatched: self.records_unmatched.load(Ordering::Relaxed),
            records_already_complete: self.records_already_complete.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`EnrichmentMetrics`] at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSnapshot {
    pub records_in: u64,
    pub records_enriched: u64,
    pub records_unmatched: u64,
    pub records_already_complete: u64,
    pub malformed_records: u64,
    pub lookups: u64,
    pub lookup_failures: u64,
}

/// Batch pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub batches: AtomicU64,
    pub records_out: AtomicU64,
    pub sink_errors: AtomicU64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = MetricsCollector::new();
        metrics.enrichment.records_in.fetch_add(3, Ordering::Relaxed);
        metrics.enrichment.records_enriched.fetch_add(2, Ordering::Relaxed);
        metrics.enrichment.lookup_failures.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.enrichment.snapshot();
        assert_eq!(snapshot.records_in, 3);
        assert_eq!(snapshot.records_enriched, 2);
        assert_eq!(snapshot.lookup_failures, 1);
        assert_eq!(snapshot.lookups, 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsCollector::new();
        metrics.enrichment.lookups.fetch_add(7, Ordering::Relaxed);
        metrics.pipeline.batches.fetch_add(2, Ordering::Relaxed);

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE spanfill_lookups_total counter"));
        assert!(output.contains("spanfill_lookups_total 7\n"));
        assert!(output.contains("spanfill_pipeline_batches_total 2\n"));
        assert!(output.contains("# TYPE spanfill_uptime_seconds gauge"));
    }
}
