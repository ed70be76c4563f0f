//! Plugin traits for pipeline stages
//!
//! A pipeline is a chain of processors followed by one or more sinks.
//! Every stage is a trait object so deployments can mix the built-in
//! stages with their own.

use crate::record::Record;
use async_trait::async_trait;
use thiserror::Error;

/// Plugin error type
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Plugin operation failed: {0}")]
    OperationFailed(String),

    #[error("Plugin configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Basic plugin information
pub trait PluginInfo {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin version
    fn version(&self) -> &str;

    /// Plugin description
    fn description(&self) -> &str {
        ""
    }
}

/// Base plugin trait - all stages implement this
pub trait Plugin: PluginInfo + Send + Sync {
    /// Release resources held by the plugin.
    ///
    /// Teardown can reach a plugin from more than one path, so
    /// implementations must tolerate repeated calls.
    fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

// =============================================================================
// PROCESSOR PLUGINS
// =============================================================================

/// Processor plugin - transforms a batch of records.
///
/// Processors are shared between workers and called concurrently with
/// disjoint batches. `process` is infallible: a processor that cannot do
/// its work must hand the batch back rather than stall the pipeline.
#[async_trait]
pub trait ProcessorPlugin: Plugin {
    /// Process a batch, returning the records to forward downstream
    async fn process(&self, records: Vec<Record>) -> Vec<Record>;
}

// =============================================================================
// SINK PLUGINS
// =============================================================================

/// Sink plugin - writes records to a destination
#[async_trait]
pub trait SinkPlugin: Plugin {
    /// Write a batch of records
    async fn output(&self, records: &[Record]) -> PluginResult<()>;

    /// Flush any buffered output
    async fn flush(&self) -> PluginResult<()> {
        Ok(())
    }
}
