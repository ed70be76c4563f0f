//! JSONL file sink

use async_trait::async_trait;
use spanfill_core::config::SinkSettings;
use spanfill_core::plugins::{Plugin, PluginError, PluginInfo, PluginResult, SinkPlugin};
use spanfill_core::record::Record;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// JSONL sink configuration
#[derive(Debug, Clone)]
pub struct JsonlSinkConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Flush after each batch
    pub flush_each: bool,
}

impl Default for JsonlSinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/spanfill.jsonl"),
            append: true,
            flush_each: true,
        }
    }
}

impl JsonlSinkConfig {
    /// Sink configuration from the `[sink]` section
    pub fn from_settings(settings: &SinkSettings) -> PluginResult<Self> {
        let path = settings.path.as_ref().ok_or_else(|| {
            PluginError::ConfigurationError("jsonl sink requires sink.path".to_string())
        })?;

        Ok(Self {
            path: PathBuf::from(path),
            append: settings.append,
            ..Default::default()
        })
    }
}

/// Writes each record's span as one line of a file
pub struct JsonlSink {
    config: JsonlSinkConfig,
    writer: Mutex<Option<BufWriter<File>>>,
    records_written: AtomicU64,
}

impl JsonlSink {
    /// Open (or create) the output file
    pub fn new(config: JsonlSinkConfig) -> PluginResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL sink writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(Some(BufWriter::new(file))),
            records_written: AtomicU64::new(0),
        })
    }

    /// Records written since the sink was opened
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    fn lock(&self) -> PluginResult<MutexGuard<'_, Option<BufWriter<File>>>> {
        self.writer
            .lock()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))
    }
}

impl PluginInfo for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Writes records to a JSONL file"
    }
}

impl Plugin for JsonlSink {
    fn shutdown(&self) -> PluginResult<()> {
        if let Some(mut writer) = self.lock()?.take() {
            writer.flush()?;
            debug!(
                "JSONL sink closed {:?} after {} records",
                self.config.path,
                self.records_written()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SinkPlugin for JsonlSink {
    async fn output(&self, records: &[Record]) -> PluginResult<()> {
        let mut guard = self.lock()?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| PluginError::OperationFailed("JSONL sink is closed".to_string()))?;

        for record in records {
            writeln!(writer, "{}", record.to_json_line()?)?;
        }

        if self.config.flush_each {
            writer.flush()?;
        }

        self.records_written
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> PluginResult<()> {
        if let Some(writer) = self.lock()?.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
