// Per-partition batch accumulation and flush
//
// A PartitionBatch is owned by exactly one task at a time. Append, threshold
// check and flush happen inside one `&mut self` call, so a threshold crossing
// produces exactly one flush without any locking.
//
// Flush order is fixed: durable write first, then publish downstream.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use trafficsplit_config::TrailingPolicy;
use trafficsplit_core::PartitionKey;

use crate::error::{Result, WriterError};
use crate::retry::{append_with_retry, RetryPolicy};
use crate::storage::BatchSink;

/// Upper bound on lines reserved up front for a batch; larger batches grow on demand.
const PREALLOCATED_LINES: usize = 64;

/// A persisted batch as published on the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBatch {
    pub partition: PartitionKey,
    pub lines: Vec<String>,
}

/// Per-partition counters reported when a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub flushes: u64,
    pub persisted_lines: u64,
    /// Lines still buffered below the threshold when the run ended.
    /// Non-zero only under [`TrailingPolicy::Discard`]; these were never written.
    pub pending_lines: u64,
}

impl PartitionStats {
    fn merge(&mut self, other: PartitionStats) {
        self.flushes += other.flushes;
        self.persisted_lines += other.persisted_lines;
        self.pending_lines += other.pending_lines;
    }
}

/// Everything a flush needs besides the batch itself.
#[derive(Clone)]
pub(crate) struct FlushContext {
    pub sink: Arc<dyn BatchSink>,
    pub retry: RetryPolicy,
    pub output: mpsc::Sender<FlushedBatch>,
}

/// The in-progress batch of a single partition.
#[derive(Debug)]
pub struct PartitionBatch {
    partition: PartitionKey,
    lines: Vec<String>,
    threshold: usize,
    stats: PartitionStats,
}

impl PartitionBatch {
    pub fn new(partition: PartitionKey, threshold: usize) -> Self {
        Self {
            partition,
            lines: Vec::with_capacity(threshold.min(PREALLOCATED_LINES)),
            threshold: threshold.max(1),
            stats: PartitionStats::default(),
        }
    }

    pub fn partition(&self) -> PartitionKey {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stats(&self) -> PartitionStats {
        self.stats
    }

    pub(crate) async fn append(&mut self, line: String, ctx: &FlushContext) -> Result<()> {
        self.lines.push(line);
        if self.lines.len() >= self.threshold {
            self.flush(ctx).await?;
        }
        Ok(())
    }

    /// Persist and publish the current lines, leaving an empty batch behind.
    ///
    /// On a write failure the lines stay buffered.
    pub(crate) async fn flush(&mut self, ctx: &FlushContext) -> Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }

        let attempts =
            append_with_retry(ctx.sink.as_ref(), &ctx.retry, self.partition, &self.lines).await?;

        let lines = std::mem::replace(
            &mut self.lines,
            Vec::with_capacity(self.threshold.min(PREALLOCATED_LINES)),
        );
        let count = lines.len() as u64;
        self.stats.flushes += 1;
        self.stats.persisted_lines += count;

        debug!(
            partition = %self.partition,
            lines = count,
            attempts,
            "Flushed batch"
        );

        ctx.output
            .send(FlushedBatch {
                partition: self.partition,
                lines,
            })
            .await
            .map_err(|_| WriterError::output_closed(self.partition))
    }

    /// Apply the trailing policy and hand back the final counters.
    pub(crate) async fn finish(
        mut self,
        policy: TrailingPolicy,
        ctx: &FlushContext,
    ) -> Result<PartitionStats> {
        match policy {
            TrailingPolicy::Flush => self.flush(ctx).await?,
            TrailingPolicy::Discard => {
                if !self.lines.is_empty() {
                    warn!(
                        partition = %self.partition,
                        pending_lines = self.lines.len(),
                        threshold = self.threshold,
                        "Discarding partial batch below flush threshold"
                    );
                    self.stats.pending_lines = self.lines.len() as u64;
                }
            }
        }
        Ok(self.stats)
    }
}

/// Batches for every partition, owned by a single task.
#[derive(Debug)]
pub struct BatchStore {
    batches: Vec<PartitionBatch>,
}

impl BatchStore {
    pub fn new(threshold: usize) -> Self {
        Self {
            batches: PartitionKey::ALL
                .into_iter()
                .map(|partition| PartitionBatch::new(partition, threshold))
                .collect(),
        }
    }

    pub fn get(&self, partition: PartitionKey) -> &PartitionBatch {
        &self.batches[partition.index()]
    }

    pub(crate) async fn append(
        &mut self,
        partition: PartitionKey,
        line: String,
        ctx: &FlushContext,
    ) -> Result<()> {
        self.batches[partition.index()].append(line, ctx).await
    }

    pub(crate) async fn finish(
        self,
        policy: TrailingPolicy,
        ctx: &FlushContext,
    ) -> Result<BTreeMap<PartitionKey, PartitionStats>> {
        let mut stats = BTreeMap::new();
        for batch in self.batches {
            let partition = batch.partition();
            stats
                .entry(partition)
                .or_insert_with(PartitionStats::default)
                .merge(batch.finish(policy, ctx).await?);
        }
        Ok(stats)
    }
}
