//! Capacity 1-4: N transform workers feed one queue drained by a single
//! consumer that owns every partition's batch.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use trafficsplit_core::Record;

use super::workers::{join_transformers, transform_worker, Route};
use super::{RunContext, RunReport};
use crate::batch::BatchStore;
use crate::error::Result;

pub(super) async fn run(
    workers: usize,
    ctx: RunContext,
    input: mpsc::Receiver<Record>,
) -> Result<RunReport> {
    let halt = ctx.shutdown.child();
    let input = Arc::new(Mutex::new(input));
    let (tx, mut rx) = mpsc::channel(ctx.settings.queue_capacity);

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            tokio::spawn(transform_worker(
                worker,
                Arc::clone(&input),
                Route::Shared(tx.clone()),
                halt.clone(),
            ))
        })
        .collect();
    drop(tx);

    let mut store = BatchStore::new(ctx.settings.flush_threshold);
    let mut failure = None;
    while let Some((partition, line)) = rx.recv().await {
        if let Err(e) = store.append(partition, line, &ctx.flush).await {
            halt.shutdown();
            failure = Some(e);
            break;
        }
    }
    // Unblocks workers parked on a full queue.
    drop(rx);

    let transformed = join_transformers(handles).await;
    if let Some(e) = failure {
        return Err(e);
    }
    let transformed = transformed?;

    let partitions = store.finish(ctx.settings.trailing, &ctx.flush).await?;
    Ok(RunReport {
        records: transformed.records,
        unclassified: transformed.unclassified,
        cancelled: transformed.cancelled,
        partitions,
        ..RunReport::new(ctx.topology)
    })
}
