//! Batch pipeline - fans batches out to workers, runs processors, then sinks

use crate::config::PipelineSettings;
use crate::metrics::MetricsCollector;
use crate::plugins::{PluginResult, ProcessorPlugin, SinkPlugin};
use crate::record::Record;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Channel capacity, in batches
    pub buffer_batches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            buffer_batches: 16,
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            buffer_batches: settings.buffer_batches.max(1),
        }
    }
}

/// The batch pipeline
pub struct Pipeline {
    config: PipelineConfig,

    /// Processors, applied in registration order
    processors: Vec<Arc<dyn ProcessorPlugin>>,

    /// Sinks, each receiving every processed batch
    sinks: Vec<Arc<dyn SinkPlugin>>,

    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    /// Create a new pipeline with configuration
    pub fn new(config: PipelineConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            processors: Vec::new(),
            sinks: Vec::new(),
            metrics,
        }
    }

    /// Add a processor
    pub fn add_processor(&mut self, processor: Arc<dyn ProcessorPlugin>) {
        self.processors.push(processor);
    }

    /// Add a sink
    pub fn add_sink(&mut self, sink: Arc<dyn SinkPlugin>) {
        self.sinks.push(sink);
    }

    /// Create the bounded channel that feeds [`Pipeline::run`]
    pub fn channel(&self) -> (mpsc::Sender<Vec<Record>>, mpsc::Receiver<Vec<Record>>) {
        mpsc::channel(self.config.buffer_batches)
    }

    /// Drain `batches` with the configured number of workers.
    ///
    /// Returns once the sending side is closed and every batch has been
    /// written. Sinks are flushed and every plugin shut down before
    /// returning; shutdown only starts after all workers have finished.
    pub async fn run(&self, batches: mpsc::Receiver<Vec<Record>>) -> PluginResult<()> {
        let batches = Arc::new(Mutex::new(batches));
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.workers);

        info!(
            "Starting pipeline: workers={}, processors={}, sinks={}",
            self.config.workers,
            self.processors.len(),
            self.sinks.len()
        );

        for worker_id in 0..self.config.workers {
            let batches = batches.clone();
            let processors = self.processors.clone();
            let sinks = self.sinks.clone();
            let metrics = self.metrics.clone();

            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, batches, &processors, &sinks, &metrics).await;
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Pipeline worker terminated abnormally: {}", e);
            }
        }

        self.teardown().await;
        info!("Pipeline stopped");
        Ok(())
    }

    async fn worker_loop(
        worker_id: usize,
        batches: Arc<Mutex<mpsc::Receiver<Vec<Record>>>>,
        processors: &[Arc<dyn ProcessorPlugin>],
        sinks: &[Arc<dyn SinkPlugin>],
        metrics: &MetricsCollector,
    ) {
        loop {
            // Hold the receiver only while waiting for the next batch
            let next = batches.lock().await.recv().await;
            let Some(mut batch) = next else {
                debug!("Worker {} exiting: input closed", worker_id);
                break;
            };

            for processor in processors {
                batch = processor.process(batch).await;
            }

            metrics.pipeline.batches.fetch_add(1, Ordering::Relaxed);
            metrics
                .pipeline
                .records_out
                .fetch_add(batch.len() as u64, Ordering::Relaxed);

            for sink in sinks {
                if let Err(e) = sink.output(&batch).await {
                    metrics.pipeline.sink_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Sink {} failed to write batch: {}", sink.name(), e);
                }
            }
        }
    }

    async fn teardown(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                warn!("Error flushing sink {}: {}", sink.name(), e);
            }
        }

        for processor in &self.processors {
            if let Err(e) = processor.shutdown() {
                warn!("Error shutting down processor {}: {}", processor.name(), e);
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.shutdown() {
                warn!("Error shutting down sink {}: {}", sink.name(), e);
            }
        }
    }
}
