// Configuration validation
//
// Validates that values are sensible before any task is spawned.
// Capacity legality is checked where the topology is selected.

use super::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_writer_config(&config.writer)?;
    validate_storage_config(&config.storage)?;
    validate_retry_config(&config.retry)?;
    Ok(())
}

fn validate_writer_config(config: &WriterConfig) -> Result<()> {
    if config.flush_threshold == 0 {
        bail!("writer.flush_threshold must be greater than 0");
    }

    if config.queue_capacity == 0 {
        bail!("writer.queue_capacity must be greater than 0");
    }

    if config.flush_threshold > MAX_FLUSH_THRESHOLD {
        bail!(
            "writer.flush_threshold ({}) must not exceed {}",
            config.flush_threshold,
            MAX_FLUSH_THRESHOLD
        );
    }

    if config.queue_capacity > MAX_QUEUE_CAPACITY {
        bail!(
            "writer.queue_capacity ({}) must not exceed {}",
            config.queue_capacity,
            MAX_QUEUE_CAPACITY
        );
    }

    if config.capacity > 256 {
        warn!(
            capacity = config.capacity,
            "writer.capacity is very large; most transform workers will sit idle"
        );
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.output_dir.trim().is_empty() {
        bail!(
            "Output directory is required\n\n\
            How to fix:\n\
              • Environment: export {}OUTPUT_DIR=/data/trafficsplit\n\
              • TOML: [storage]\n              output_dir = \"/data/trafficsplit\"",
            ENV_PREFIX
        );
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<()> {
    if config.initial_backoff_ms > config.max_backoff_ms {
        bail!(
            "retry.initial_backoff_ms ({}) must not exceed retry.max_backoff_ms ({})",
            config.initial_backoff_ms,
            config.max_backoff_ms
        );
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        bail!("retry.multiplier must be a finite value >= 1.0");
    }

    if config.max_retries > 20 {
        warn!(
            max_retries = config.max_retries,
            "retry.max_retries is very large; a failing partition may stall for a long time"
        );
    }

    Ok(())
}
