//! Configuration system for spanfill
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of the trace group lookup and sink settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete spanfill configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanfillConfig {
    /// Logging settings
    pub logging: LoggingSettings,

    /// Batch pipeline settings
    pub pipeline: PipelineSettings,

    /// Trace group lookup settings
    pub trace_group: TraceGroupSettings,

    /// Output sink settings
    pub sink: SinkSettings,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Batch pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Number of workers calling processors concurrently
    pub workers: usize,

    /// Records per batch
    pub batch_size: usize,

    /// Batches buffered between the reader and the workers
    pub buffer_batches: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 512,
            buffer_batches: 16,
        }
    }
}

/// Trace group lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceGroupSettings {
    /// Document store endpoints, e.g. `http://localhost:9200`
    pub hosts: Vec<String>,

    /// Index (or index pattern) holding span documents
    pub index: String,

    /// Field carrying the trace id
    pub trace_id_field: String,

    /// Field carrying the trace group
    pub trace_group_field: String,

    /// Basic auth username
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Upper bound on a single lookup, in milliseconds
    pub request_timeout_ms: u64,

    /// Maximum hits requested per lookup, when not restricted to root spans
    pub max_hits: usize,

    /// Only match root spans (parent span id is empty)
    pub root_spans_only: bool,

    /// Field carrying the parent span id
    pub parent_span_id_field: String,
}

impl Default for TraceGroupSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:9200".to_string()],
            index: "otel-v1-apm-span-*".to_string(),
            trace_id_field: "traceId".to_string(),
            trace_group_field: "traceGroup".to_string(),
            username: None,
            password: None,
            request_timeout_ms: 10_000,
            max_hits: 10_000,
            root_spans_only: true,
            parent_span_id_field: "parentSpanId".to_string(),
        }
    }
}

impl TraceGroupSettings {
    /// Lookup timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Output sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Sink kind: stdout, jsonl
    pub kind: String,

    /// Output file path (jsonl sink)
    pub path: Option<String>,

    /// Append to an existing file (jsonl sink)
    pub append: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: "stdout".to_string(),
            path: None,
            append: true,
        }
    }
}

/// Default `index.max_result_window` of OpenSearch and Elasticsearch.
/// Larger `size` values are rejected by the server with a 400.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SPANFILL_CONFIG environment variable
    /// 3. ~/.config/spanfill/config.toml
    /// 4. /etc/spanfill/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<SpanfillConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            SpanfillConfig::default()
        };

        self.apply_overrides(&mut config, |key| std::env::var(key).ok());
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SPANFILL_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SPANFILL_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/spanfill/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<SpanfillConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: SpanfillConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `SPANFILL_*` overrides read through `lookup`
    fn apply_overrides<F>(&self, config: &mut SpanfillConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("SPANFILL_LOG_LEVEL") {
            config.logging.level = val;
        }

        if let Some(val) = lookup("SPANFILL_WORKERS") {
            match val.parse() {
                Ok(workers) => config.pipeline.workers = workers,
                Err(_) => warn!("Ignoring invalid SPANFILL_WORKERS: {}", val),
            }
        }
        if let Some(val) = lookup("SPANFILL_BATCH_SIZE") {
            match val.parse() {
                Ok(size) => config.pipeline.batch_size = size,
                Err(_) => warn!("Ignoring invalid SPANFILL_BATCH_SIZE: {}", val),
            }
        }

        if let Some(val) = lookup("SPANFILL_HOSTS") {
            config.trace_group.hosts = val
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = lookup("SPANFILL_INDEX") {
            config.trace_group.index = val;
        }
        if let Some(val) = lookup("SPANFILL_USERNAME") {
            config.trace_group.username = Some(val);
        }
        if let Some(val) = lookup("SPANFILL_PASSWORD") {
            config.trace_group.password = Some(val);
        }

        if let Some(val) = lookup("SPANFILL_SINK") {
            config.sink.kind = val;
        }
        if let Some(val) = lookup("SPANFILL_SINK_PATH") {
            config.sink.path = Some(val);
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &SpanfillConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.logging.level, valid_levels
            )));
        }

        if config.pipeline.workers == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if config.pipeline.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.batch_size must be at least 1".to_string(),
            ));
        }

        let tg = &config.trace_group;
        if tg.hosts.is_empty() {
            return Err(ConfigError::ValidationError(
                "trace_group.hosts must list at least one endpoint".to_string(),
            ));
        }
        if tg.index.is_empty() {
            return Err(ConfigError::ValidationError(
                "trace_group.index cannot be empty".to_string(),
            ));
        }
        if tg.trace_id_field.is_empty() || tg.trace_group_field.is_empty() {
            return Err(ConfigError::ValidationError(
                "trace_group field names cannot be empty".to_string(),
            ));
        }
        if tg.trace_id_field == tg.trace_group_field {
            return Err(ConfigError::ValidationError(format!(
                "trace_id_field and trace_group_field are both '{}'",
                tg.trace_id_field
            )));
        }
        if tg.max_hits == 0 {
            return Err(ConfigError::ValidationError(
                "trace_group.max_hits must be at least 1".to_string(),
            ));
        }
        if tg.max_hits > MAX_RESULT_WINDOW {
            return Err(ConfigError::ValidationError(format!(
                "trace_group.max_hits is {}, but a search can return at most {} hits",
                tg.max_hits, MAX_RESULT_WINDOW
            )));
        }

        let valid_sinks = ["stdout", "jsonl"];
        if !valid_sinks.contains(&config.sink.kind.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sink kind: {}. Must be one of: {:?}",
                config.sink.kind, valid_sinks
            )));
        }
        if config.sink.kind.eq_ignore_ascii_case("jsonl") && config.sink.path.is_none() {
            return Err(ConfigError::ValidationError(
                "jsonl sink requires sink.path".to_string(),
            ));
        }

        Ok(())
    }

    /// Render configuration as TOML
    pub fn to_toml(config: &SpanfillConfig) -> ConfigResult<String> {
        toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Save configuration to a file
    pub fn save(&self, config: &SpanfillConfig, path: &Path) -> ConfigResult<()> {
        let content = Self::to_toml(config)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("spanfill").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
