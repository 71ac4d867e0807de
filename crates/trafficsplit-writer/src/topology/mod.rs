//! Writer topologies.
//!
//! Every topology consumes the input stream until it closes (or the run is
//! cancelled) and composes the same three steps: classify, serialize, append.
//! They differ only in which task does which step:
//!
//! | capacity | topology    | tasks                                                  |
//! |----------|-------------|--------------------------------------------------------|
//! | 0        | Sequential  | the caller's task does everything                      |
//! | 1-4      | Pooled      | N transform tasks -> one queue -> one flushing consumer |
//! | 5        | Partitioned | router classifies -> 4 partition writers               |
//! | >= 9     | Hybrid      | N-4 transform tasks -> 4 queues -> 4 partition writers  |
//!
//! A partition's batch always has exactly one owning task, so lines are never
//! reordered within a partition relative to the order that owner receives them.
//! Cross-partition order on the output stream is unspecified for every
//! topology except Sequential.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info};
use trafficsplit_config::{
    RuntimeConfig, TrailingPolicy, MAX_FLUSH_THRESHOLD, MAX_QUEUE_CAPACITY,
};
use trafficsplit_core::{PartitionKey, Record};

use crate::batch::{FlushContext, FlushedBatch, PartitionStats};
use crate::error::{Result, WriterError};
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownHandle;
use crate::storage::BatchSink;

mod hybrid;
mod partitioned;
mod pooled;
mod sequential;
mod workers;

/// Concurrency strategy, selected once per run from a capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Sequential,
    Pooled { workers: usize },
    Partitioned,
    Hybrid { transformers: usize },
}

impl Topology {
    /// Select the topology for a concurrency capacity.
    ///
    /// Capacities 6, 7, 8 and negative values select nothing and are rejected.
    pub fn from_capacity(capacity: i64) -> Result<Self> {
        match capacity {
            0 => Ok(Topology::Sequential),
            1..=4 => Ok(Topology::Pooled {
                workers: capacity as usize,
            }),
            5 => Ok(Topology::Partitioned),
            c if c >= 9 => usize::try_from(capacity - 4)
                .map(|transformers| Topology::Hybrid { transformers })
                .map_err(|_| WriterError::invalid_capacity(capacity)),
            _ => Err(WriterError::invalid_capacity(capacity)),
        }
    }

    /// The capacity this topology was selected from.
    pub fn capacity(&self) -> i64 {
        match *self {
            Topology::Sequential => 0,
            Topology::Pooled { workers } => workers as i64,
            Topology::Partitioned => 5,
            Topology::Hybrid { transformers } => transformers as i64 + 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Topology::Sequential => "sequential",
            Topology::Pooled { .. } => "pooled",
            Topology::Partitioned => "partitioned",
            Topology::Hybrid { .. } => "hybrid",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Pooled { workers } => write!(f, "pooled ({} transform workers)", workers),
            Topology::Hybrid { transformers } => write!(
                f,
                "hybrid ({} transform workers, {} partition writers)",
                transformers,
                PartitionKey::ALL.len()
            ),
            other => f.write_str(other.name()),
        }
    }
}

/// Batching and queueing knobs shared by every topology.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub flush_threshold: usize,
    pub queue_capacity: usize,
    pub trailing: TrailingPolicy,
    pub retry: RetryPolicy,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            flush_threshold: 5,
            queue_capacity: 200,
            trailing: TrailingPolicy::Discard,
            retry: RetryPolicy::default(),
        }
    }
}

impl WriterSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            flush_threshold: config.writer.flush_threshold,
            queue_capacity: config.writer.queue_capacity,
            trailing: config.writer.trailing,
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_FLUSH_THRESHOLD).contains(&self.flush_threshold) {
            return Err(WriterError::invalid_config(format!(
                "flush_threshold must be between 1 and {}, got {}",
                MAX_FLUSH_THRESHOLD, self.flush_threshold
            )));
        }
        if !(1..=MAX_QUEUE_CAPACITY).contains(&self.queue_capacity) {
            return Err(WriterError::invalid_config(format!(
                "queue_capacity must be between 1 and {}, got {}",
                MAX_QUEUE_CAPACITY, self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub topology: Topology,
    /// Records taken from the input stream.
    pub records: u64,
    /// Records outside every usage range; counted, never persisted.
    pub unclassified: u64,
    /// The run stopped because its shutdown handle was raised.
    pub cancelled: bool,
    pub partitions: BTreeMap<PartitionKey, PartitionStats>,
}

impl RunReport {
    fn new(topology: Topology) -> Self {
        Self {
            topology,
            records: 0,
            unclassified: 0,
            cancelled: false,
            partitions: PartitionKey::ALL
                .into_iter()
                .map(|partition| (partition, PartitionStats::default()))
                .collect(),
        }
    }

    pub fn partition(&self, partition: PartitionKey) -> PartitionStats {
        self.partitions
            .get(&partition)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_flushes(&self) -> u64 {
        self.partitions.values().map(|s| s.flushes).sum()
    }

    pub fn persisted_lines(&self) -> u64 {
        self.partitions.values().map(|s| s.persisted_lines).sum()
    }

    pub fn pending_lines(&self) -> u64 {
        self.partitions.values().map(|s| s.pending_lines).sum()
    }
}

/// What a topology needs to run.
pub(crate) struct RunContext {
    pub topology: Topology,
    pub settings: WriterSettings,
    pub flush: FlushContext,
    pub shutdown: ShutdownHandle,
}

/// Partitioned streaming writer bound to one topology.
pub struct PartitionWriter {
    topology: Topology,
    settings: WriterSettings,
    sink: Arc<dyn BatchSink>,
    output: mpsc::Sender<FlushedBatch>,
    shutdown: ShutdownHandle,
}

impl PartitionWriter {
    /// Build a writer for a concurrency capacity, rejecting capacities that
    /// select no topology.
    pub fn new(
        capacity: i64,
        settings: WriterSettings,
        sink: Arc<dyn BatchSink>,
        output: mpsc::Sender<FlushedBatch>,
    ) -> Result<Self> {
        Self::with_topology(Topology::from_capacity(capacity)?, settings, sink, output)
    }

    pub fn with_topology(
        topology: Topology,
        settings: WriterSettings,
        sink: Arc<dyn BatchSink>,
        output: mpsc::Sender<FlushedBatch>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            topology,
            settings,
            sink,
            output,
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn from_config(
        config: &RuntimeConfig,
        sink: Arc<dyn BatchSink>,
        output: mpsc::Sender<FlushedBatch>,
    ) -> Result<Self> {
        Self::new(
            config.writer.capacity,
            WriterSettings::from_config(config),
            sink,
            output,
        )
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Handle that cancels this writer's run when raised.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Consume `input` until it closes or the run is cancelled.
    ///
    /// The first write failure stops the run; remaining tasks are drained and
    /// the failure is returned.
    pub async fn run(self, input: mpsc::Receiver<Record>) -> Result<RunReport> {
        let started = Instant::now();
        let topology = self.topology;
        info!(
            topology = %topology,
            flush_threshold = self.settings.flush_threshold,
            queue_capacity = self.settings.queue_capacity,
            trailing = %self.settings.trailing,
            "Writer started"
        );

        let ctx = RunContext {
            topology,
            flush: FlushContext {
                sink: self.sink,
                retry: self.settings.retry.clone(),
                output: self.output,
            },
            settings: self.settings,
            shutdown: self.shutdown,
        };

        let result = match topology {
            Topology::Sequential => sequential::run(ctx, input).await,
            Topology::Pooled { workers } => pooled::run(workers, ctx, input).await,
            Topology::Partitioned => partitioned::run(ctx, input).await,
            Topology::Hybrid { transformers } => hybrid::run(transformers, ctx, input).await,
        };

        match &result {
            Ok(report) => info!(
                topology = %topology,
                records = report.records,
                unclassified = report.unclassified,
                flushes = report.total_flushes(),
                persisted_lines = report.persisted_lines(),
                pending_lines = report.pending_lines(),
                cancelled = report.cancelled,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Writer finished"
            ),
            Err(e) => error!(
                topology = %topology,
                partition = ?e.partition(),
                error = %e,
                "Writer failed"
            ),
        }

        result
    }
}
