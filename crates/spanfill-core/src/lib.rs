//! spanfill core - record envelope, plugin traits, configuration and pipeline
//!
//! - **Record**: the envelope wrapping one decoded span
//! - **Plugins**: processor and sink traits
//! - **Config**: TOML configuration with environment overrides
//! - **Pipeline**: worker pool driving processors and sinks

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod record;

// Re-export commonly used types
pub use config::{ConfigLoader, SpanfillConfig, TraceGroupSettings};
pub use metrics::MetricsCollector;
pub use pipeline::{Pipeline, PipelineConfig};
pub use plugins::{Plugin, PluginError, PluginInfo, PluginResult, ProcessorPlugin, SinkPlugin};
pub use record::{Record, SpanData};

/// spanfill version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
