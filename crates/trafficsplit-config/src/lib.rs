// trafficsplit-config - Unified configuration for the partitioned writer
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from TRAFFICSPLIT_CONFIG env var
// 3. Config file contents from TRAFFICSPLIT_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.trafficsplit.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Largest accepted `writer.flush_threshold`.
pub const MAX_FLUSH_THRESHOLD: usize = 1_000_000;

/// Largest accepted `writer.queue_capacity`.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Writer topology and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Concurrency capacity; selects the topology (0, 1-4, 5 or >= 9).
    pub capacity: i64,
    /// Lines per partition that trigger a flush.
    pub flush_threshold: usize,
    /// Bound of every queue between pipeline stages.
    pub queue_capacity: usize,
    /// What happens to sub-threshold batches when the input ends or is cancelled.
    pub trailing: TrailingPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            flush_threshold: 5,
            queue_capacity: 200,
            trailing: TrailingPolicy::Discard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingPolicy {
    /// Leave partial batches unwritten; they are reported, not persisted.
    #[default]
    Discard,
    /// Write and publish every non-empty partial batch before returning.
    Flush,
}

impl std::fmt::Display for TrailingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrailingPolicy::Discard => write!(f, "discard"),
            TrailingPolicy::Flush => write!(f, "flush"),
        }
    }
}

impl std::str::FromStr for TrailingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "discard" | "drop" => Ok(TrailingPolicy::Discard),
            "flush" => Ok(TrailingPolicy::Flush),
            _ => anyhow::bail!("Unsupported trailing policy: {}. Supported: discard, flush", s),
        }
    }
}

/// Partition file storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: String,
    /// Create missing partition files instead of failing the flush.
    pub create_missing: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: "./output".to_string(),
            create_missing: false,
        }
    }
}

/// Bounded retry for transient write failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Load configuration with graceful fallback to defaults.
    /// Does not fail if config file is missing - uses built-in defaults instead.
    pub fn load_or_default() -> Result<Self> {
        sources::load_or_default()
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Build a configuration from inline TOML plus overrides supplied by an `EnvSource`.
    pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<Self> {
        let mut config = match inline_config {
            Some(inline) => {
                toml::from_str(inline).context("Failed to parse inline config content")?
            }
            None => RuntimeConfig::default(),
        };

        config.apply_env_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_policy_from_str() {
        assert_eq!(
            "discard".parse::<TrailingPolicy>().unwrap(),
            TrailingPolicy::Discard
        );
        assert_eq!(
            "FLUSH".parse::<TrailingPolicy>().unwrap(),
            TrailingPolicy::Flush
        );
        assert!("keep".parse::<TrailingPolicy>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.writer.capacity, 0);
        assert_eq!(config.writer.flush_threshold, 5);
        assert_eq!(config.writer.queue_capacity, 200);
        assert_eq!(config.writer.trailing, TrailingPolicy::Discard);
        assert_eq!(config.storage.output_dir, "./output");
        assert!(!config.storage.create_missing);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [writer]
            capacity = 12
            trailing = "flush"

            [retry]
            max_retries = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.writer.capacity, 12);
        assert_eq!(config.writer.trailing, TrailingPolicy::Flush);
        assert_eq!(config.writer.flush_threshold, 5);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.initial_backoff(), Duration::from_millis(50));
        assert_eq!(config.storage.output_dir, "./output");
    }
}
