use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use trafficsplit::{InputSource, RunSummary};
use trafficsplit_config::{RuntimeConfig, TrailingPolicy};
use trafficsplit_writer::Topology;

/// Split broker traffic records into usage-range partition files
#[derive(Parser)]
#[command(name = "trafficsplit")]
#[command(version)]
#[command(about = "Split broker traffic records into usage-range partition files", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON Lines file of records, or `-` for stdin
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    input: String,

    /// Concurrency capacity: 0, 1-4, 5 or >= 9 (overrides config file)
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    capacity: Option<i64>,

    /// Directory holding the partition files (overrides config file)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Persist partial batches when the input ends instead of discarding them
    #[arg(long)]
    flush_partial: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build tokio runtime and run the pipeline
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load_or_default().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);

    // Step 3: Initialize tracing, then validate so its warnings are logged
    trafficsplit::init_tracing(&config);
    config.validate()?;

    // Step 4: Reject unusable capacities and output directories before reading input
    let topology = Topology::from_capacity(config.writer.capacity)?;
    validate_output_dir(&config).await?;

    display_startup_info(&config, topology, &cli.input);

    let summary = trafficsplit::run_with_config(config, InputSource::from_arg(&cli.input)).await?;
    display_summary(&summary);
    Ok(())
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(capacity) = cli.capacity {
        config.writer.capacity = capacity;
    }

    if let Some(output) = &cli.output {
        config.storage.output_dir = output.to_string_lossy().to_string();
    }

    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }

    if cli.flush_partial {
        config.writer.trailing = TrailingPolicy::Flush;
    }
}

async fn validate_output_dir(config: &RuntimeConfig) -> Result<()> {
    use tracing::info;

    let output_path = Path::new(&config.storage.output_dir);

    if !output_path.exists() {
        if !config.storage.create_missing {
            anyhow::bail!(
                "Output directory '{}' does not exist.\n\
                How to fix: create it along with its partition files, or set \
                storage.create_missing = true (TRAFFICSPLIT_CREATE_MISSING=true).",
                config.storage.output_dir
            );
        }
        info!("Creating output directory: {}", config.storage.output_dir);
        tokio::fs::create_dir_all(output_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory: {}",
                    config.storage.output_dir
                )
            })?;
    }

    // Validate writability by creating a test file
    let test_file = output_path.join(".trafficsplit-write-test");
    tokio::fs::write(&test_file, b"test").await.with_context(|| {
        format!(
            "Output directory '{}' is not writable. Check permissions.",
            config.storage.output_dir
        )
    })?;
    tokio::fs::remove_file(&test_file)
        .await
        .context("Failed to remove test file")?;
    info!("Output directory validated: {}", config.storage.output_dir);

    Ok(())
}

fn display_startup_info(config: &RuntimeConfig, topology: Topology, input: &str) {
    use tracing::info;

    info!("╭─────────────────────────────────────────────────");
    info!("│ trafficsplit v{}", env!("CARGO_PKG_VERSION"));
    info!("├─────────────────────────────────────────────────");
    info!(
        "│ Input: {}",
        if input == "-" { "stdin" } else { input }
    );
    info!("│ Output directory: {}", config.storage.output_dir);
    info!("│ Capacity: {} ({})", config.writer.capacity, topology);
    info!("│ Flush threshold: {} lines", config.writer.flush_threshold);
    info!("│ Trailing batches: {}", config.writer.trailing);
    info!("│ Log level: {}", config.log.level);
    info!("╰─────────────────────────────────────────────────");
}

fn display_summary(summary: &RunSummary) {
    use tracing::info;

    let report = &summary.report;
    info!("╭─────────────────────────────────────────────────");
    info!(
        "│ Records: {} read, {} malformed, {} unclassified",
        summary.input.lines, summary.input.malformed, report.unclassified
    );
    for (partition, stats) in &report.partitions {
        info!(
            "│   {}: {} flushes, {} lines persisted, {} pending",
            partition.file_name(),
            stats.flushes,
            stats.persisted_lines,
            stats.pending_lines
        );
    }
    info!("│ Batches published: {}", summary.published_batches);
    if report.cancelled {
        info!("│ Run was cancelled before input ended");
    }
    info!("╰─────────────────────────────────────────────────");
}
