// Building blocks shared by the concurrent topologies
//
// Transform workers pull records from a shared input, classify and serialize
// them, and route lines downstream. Partition writers own one batch each and
// drain one queue until every sender is gone.
//
// Failure propagation: a writer that fails raises the run's internal halt so
// the stages pulling from input stop instead of blocking on a full queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use trafficsplit_config::TrailingPolicy;
use trafficsplit_core::{classify, serialize, Classification, PartitionKey, Record};

use crate::batch::{FlushContext, PartitionBatch, PartitionStats};
use crate::error::{Result, WriterError};
use crate::shutdown::ShutdownHandle;

pub(super) type SharedInput = Arc<Mutex<mpsc::Receiver<Record>>>;

pub(super) enum Next {
    Record(Record),
    Closed,
    Cancelled,
}

/// Wait for the next record, preferring cancellation when both are ready.
pub(super) async fn next_record(
    input: &mut mpsc::Receiver<Record>,
    shutdown: &ShutdownHandle,
) -> Next {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Next::Cancelled,
        record = input.recv() => match record {
            Some(record) => Next::Record(record),
            None => Next::Closed,
        },
    }
}

async fn next_shared(input: &SharedInput, shutdown: &ShutdownHandle) -> Next {
    let mut guard = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Next::Cancelled,
        guard = input.lock() => guard,
    };
    next_record(&mut guard, shutdown).await
}

pub(super) fn note_unclassified(record: &Record) {
    debug!(
        id = record.id,
        traffic_usage = record.traffic_usage,
        "Record outside every usage range, skipping"
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct TransformStats {
    pub records: u64,
    pub unclassified: u64,
    pub cancelled: bool,
}

impl TransformStats {
    fn merge(&mut self, other: TransformStats) {
        self.records += other.records;
        self.unclassified += other.unclassified;
        self.cancelled |= other.cancelled;
    }
}

/// Where a transform worker sends serialized lines.
#[derive(Clone)]
pub(super) enum Route {
    /// One queue shared by every partition, drained by a single consumer.
    Shared(mpsc::Sender<(PartitionKey, String)>),
    /// One queue per partition, indexed by [`PartitionKey::index`].
    PerPartition(Vec<mpsc::Sender<String>>),
}

impl Route {
    /// Returns false once the receiving side is gone.
    async fn send(&self, partition: PartitionKey, line: String) -> bool {
        match self {
            Route::Shared(tx) => tx.send((partition, line)).await.is_ok(),
            Route::PerPartition(txs) => txs[partition.index()].send(line).await.is_ok(),
        }
    }
}

pub(super) async fn transform_worker(
    worker: usize,
    input: SharedInput,
    route: Route,
    shutdown: ShutdownHandle,
) -> TransformStats {
    let mut stats = TransformStats::default();
    loop {
        let record = match next_shared(&input, &shutdown).await {
            Next::Record(record) => record,
            Next::Closed => break,
            Next::Cancelled => {
                stats.cancelled = true;
                break;
            }
        };
        stats.records += 1;

        match classify(record.traffic_usage) {
            Classification::Partition(partition) => {
                if !route.send(partition, serialize(&record)).await {
                    debug!(worker, partition = %partition, "Downstream queue closed, stopping");
                    break;
                }
            }
            Classification::Unclassified => {
                stats.unclassified += 1;
                note_unclassified(&record);
            }
        }
    }
    debug!(worker, records = stats.records, "Transform worker finished");
    stats
}

/// Drain one partition's queue into its batch.
pub(super) async fn partition_writer<T, F>(
    partition: PartitionKey,
    mut rx: mpsc::Receiver<T>,
    to_line: F,
    threshold: usize,
    trailing: TrailingPolicy,
    flush: FlushContext,
    halt: ShutdownHandle,
) -> Result<PartitionStats>
where
    F: Fn(T) -> String,
{
    let mut batch = PartitionBatch::new(partition, threshold);
    while let Some(item) = rx.recv().await {
        if let Err(e) = batch.append(to_line(item), &flush).await {
            halt.shutdown();
            return Err(e);
        }
    }
    batch.finish(trailing, &flush).await
}

pub(super) async fn join_transformers(
    handles: Vec<JoinHandle<TransformStats>>,
) -> Result<TransformStats> {
    let mut total = TransformStats::default();
    let mut failure = None;
    for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
        match joined {
            Ok(stats) => total.merge(stats),
            Err(e) => {
                if failure.is_none() {
                    failure = Some(WriterError::task_failed(format!("transform-{worker}"), e));
                }
            }
        }
    }
    failure.map_or(Ok(total), Err)
}

/// Join every partition writer; the first failure in partition order wins.
pub(super) async fn join_writers(
    handles: Vec<(PartitionKey, JoinHandle<Result<PartitionStats>>)>,
) -> Result<BTreeMap<PartitionKey, PartitionStats>> {
    let (partitions, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let mut stats = BTreeMap::new();
    let mut failure = None;
    for (partition, joined) in partitions.into_iter().zip(join_all(handles).await) {
        let result = joined
            .map_err(|e| WriterError::task_failed(format!("writer-{partition}"), e))
            .and_then(|r| r);
        match result {
            Ok(partition_stats) => {
                stats.insert(partition, partition_stats);
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }
    failure.map_or(Ok(stats), Err)
}
