//! Error types for partitioned writing.

use std::io;

use thiserror::Error;
use trafficsplit_core::PartitionKey;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Concurrency capacity does not select a topology
    E001InvalidCapacity,
    /// E002: Configuration missing or invalid
    E002InvalidConfig,
    /// E003: Partition write failed
    E003WriteFailure,
    /// E004: Nobody is draining the output stream
    E004OutputClosed,
    /// E005: A spawned task panicked or was aborted
    E005TaskFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001InvalidCapacity => "E001",
            Self::E002InvalidConfig => "E002",
            Self::E003WriteFailure => "E003",
            Self::E004OutputClosed => "E004",
            Self::E005TaskFailed => "E005",
        }
    }
}

/// Errors surfaced by writer construction and `run`
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("[{code}] Invalid concurrency capacity {capacity}: expected 0, 1-4, 5 or a value >= 9")]
    InvalidCapacity { code: &'static str, capacity: i64 },

    #[error("[{code}] Invalid configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    #[error("[{code}] Write to partition {partition} failed after {attempts} attempt(s): {source}")]
    WriteFailure {
        code: &'static str,
        partition: PartitionKey,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("[{code}] Output stream closed; batch for partition {partition} was persisted but not published")]
    OutputClosed {
        code: &'static str,
        partition: PartitionKey,
    },

    #[error("[{code}] Task '{task}' failed: {reason}")]
    TaskFailed {
        code: &'static str,
        task: String,
        reason: String,
    },
}

impl WriterError {
    pub fn invalid_capacity(capacity: i64) -> Self {
        Self::InvalidCapacity {
            code: ErrorCode::E001InvalidCapacity.as_str(),
            capacity,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E002InvalidConfig.as_str(),
            message: message.into(),
        }
    }

    pub fn write_failure(partition: PartitionKey, attempts: u32, source: io::Error) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E003WriteFailure.as_str(),
            partition,
            attempts,
            source,
        }
    }

    pub fn output_closed(partition: PartitionKey) -> Self {
        Self::OutputClosed {
            code: ErrorCode::E004OutputClosed.as_str(),
            partition,
        }
    }

    pub fn task_failed(task: impl Into<String>, reason: impl ToString) -> Self {
        Self::TaskFailed {
            code: ErrorCode::E005TaskFailed.as_str(),
            task: task.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCapacity { .. } => ErrorCode::E001InvalidCapacity,
            Self::InvalidConfig { .. } => ErrorCode::E002InvalidConfig,
            Self::WriteFailure { .. } => ErrorCode::E003WriteFailure,
            Self::OutputClosed { .. } => ErrorCode::E004OutputClosed,
            Self::TaskFailed { .. } => ErrorCode::E005TaskFailed,
        }
    }

    /// Partition the error is attributed to, if any.
    pub fn partition(&self) -> Option<PartitionKey> {
        match self {
            Self::WriteFailure { partition, .. } | Self::OutputClosed { partition, .. } => {
                Some(*partition)
            }
            _ => None,
        }
    }
}

/// Result type alias for WriterError
pub type Result<T> = std::result::Result<T, WriterError>;
