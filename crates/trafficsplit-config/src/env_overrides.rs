use super::{LogFormat, RuntimeConfig, TrailingPolicy};
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "TRAFFICSPLIT_";

/// Abstraction over environment-variable lookups so tests (and embedders)
/// can supply their own source of overrides.
pub trait EnvSource {
    /// Look up `key` (without the TRAFFICSPLIT_ prefix).
    fn get(&self, key: &str) -> Option<String>;
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Writer configuration
    if let Some(val) = get_env_parsed::<E, i64>(env, "CAPACITY")? {
        config.writer.capacity = val;
    }
    if let Some(val) = get_env_parsed::<E, usize>(env, "FLUSH_THRESHOLD")? {
        config.writer.flush_threshold = val;
    }
    if let Some(val) = get_env_parsed::<E, usize>(env, "QUEUE_CAPACITY")? {
        config.writer.queue_capacity = val;
    }
    if let Some(policy) = env.get("TRAILING") {
        config.writer.trailing = policy
            .parse::<TrailingPolicy>()
            .context("Invalid TRAFFICSPLIT_TRAILING value")?;
    }

    // Storage configuration
    if let Some(dir) = env.get("OUTPUT_DIR") {
        config.storage.output_dir = dir;
    }
    if let Some(val) = get_env_parsed::<E, bool>(env, "CREATE_MISSING")? {
        config.storage.create_missing = val;
    }

    // Retry configuration
    if let Some(val) = get_env_parsed::<E, u32>(env, "RETRY_MAX")? {
        config.retry.max_retries = val;
    }
    if let Some(val) = get_env_parsed::<E, u64>(env, "RETRY_INITIAL_BACKOFF_MS")? {
        config.retry.initial_backoff_ms = val;
    }
    if let Some(val) = get_env_parsed::<E, u64>(env, "RETRY_MAX_BACKOFF_MS")? {
        config.retry.max_backoff_ms = val;
    }
    if let Some(val) = get_env_parsed::<E, f64>(env, "RETRY_MULTIPLIER")? {
        config.retry.multiplier = val;
    }

    // Logging configuration
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log.format = format
            .parse::<LogFormat>()
            .context("Invalid TRAFFICSPLIT_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
