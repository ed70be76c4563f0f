//! spanfill - trace group backfill for OpenTelemetry spans
//!
//! Reads spans as JSON lines, fills in missing trace groups from the span
//! index and writes the spans back out.

mod input;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spanfill_core::config::{ConfigLoader, SpanfillConfig};
use spanfill_core::metrics::MetricsCollector;
use spanfill_core::pipeline::{Pipeline, PipelineConfig};
use spanfill_core::plugins::SinkPlugin;
use spanfill_enrich::TraceGroupProcessor;
use spanfill_export::{JsonlSink, JsonlSinkConfig, StdOutSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "spanfill")]
#[command(version)]
#[command(about = "Backfill missing trace groups on OpenTelemetry spans", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (json, text)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SPANFILL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich spans read as JSON lines
    Run {
        /// Input file (JSONL), or - for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Write to this JSONL file instead of the configured sink
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Records per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Print metrics in Prometheus format when done
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();
    let config_level = loaded
        .as_ref()
        .map(|config| config.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };
    init_logging(log_level, &cli.format)?;

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load configuration: {}, using defaults", e);
            SpanfillConfig::default()
        }
    };

    match cli.command {
        Commands::Run {
            input,
            output,
            workers,
            batch_size,
            metrics,
        } => {
            let config = merge_run_config(config, output, workers, batch_size)?;
            run_command(config, &input, metrics).await
        }
        Commands::Config => {
            print!("{}", ConfigLoader::to_toml(&config)?);
            Ok(())
        }
    }
}

/// Install the global subscriber. Logs go to stderr; stdout carries records.
fn init_logging(level: Level, format: &str) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        _ => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
    }

    Ok(())
}

/// CLI arguments take precedence over the config file
fn merge_run_config(
    mut config: SpanfillConfig,
    output: Option<PathBuf>,
    workers: Option<usize>,
    batch_size: Option<usize>,
) -> anyhow::Result<SpanfillConfig> {
    if let Some(path) = output {
        config.sink.kind = "jsonl".to_string();
        config.sink.path = Some(path.to_string_lossy().into_owned());
    }
    if let Some(workers) = workers {
        config.pipeline.workers = workers;
    }
    if let Some(batch_size) = batch_size {
        config.pipeline.batch_size = batch_size;
    }

    ConfigLoader::new()
        .validate(&config)
        .context("Invalid run configuration")?;
    Ok(config)
}

fn build_sink(config: &SpanfillConfig) -> anyhow::Result<Arc<dyn SinkPlugin>> {
    // Validation accepts any case
    match config.sink.kind.to_ascii_lowercase().as_str() {
        "jsonl" => {
            let sink = JsonlSink::new(JsonlSinkConfig::from_settings(&config.sink)?)?;
            Ok(Arc::new(sink))
        }
        "stdout" => Ok(Arc::new(StdOutSink::new())),
        other => anyhow::bail!("Unknown sink kind: {}", other),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open input {}", input))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn run_command(
    config: SpanfillConfig,
    input_path: &str,
    print_metrics: bool,
) -> anyhow::Result<()> {
    info!(
        "spanfill v{} reading {}, looking up trace groups in {} on {:?}",
        spanfill_core::VERSION,
        input_path,
        config.trace_group.index,
        config.trace_group.hosts
    );

    let metrics = Arc::new(MetricsCollector::new());
    let processor = TraceGroupProcessor::new(&config.trace_group)?
        .with_metrics(metrics.enrichment.clone());

    let mut pipeline = Pipeline::new(PipelineConfig::from(&config.pipeline), metrics.clone());
    pipeline.add_processor(Arc::new(processor));
    pipeline.add_sink(build_sink(&config)?);

    let source = open_input(input_path).await?;
    let (tx, rx) = pipeline.channel();
    let batch_size = config.pipeline.batch_size;

    let reader = tokio::spawn(input::read_batches_until(
        source,
        batch_size,
        tx,
        interrupted(),
    ));

    pipeline.run(rx).await?;
    let stats = reader.await??;

    let e = metrics.enrichment.snapshot();
    info!(
        "Done: {} lines read ({} rejected), {} records in, {} enriched, {} unmatched, {} already complete, {} malformed, {} lookups ({} failed)",
        stats.lines,
        stats.rejected,
        e.records_in,
        e.records_enriched,
        e.records_unmatched,
        e.records_already_complete,
        e.malformed_records,
        e.lookups,
        e.lookup_failures
    );

    if print_metrics {
        eprint!("{}", metrics.to_prometheus());
    }

    Ok(())
}
