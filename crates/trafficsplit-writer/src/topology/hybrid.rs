//! Capacity >= 9: `capacity - 4` transform workers classify and serialize,
//! four partition writers batch and flush.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use trafficsplit_core::{PartitionKey, Record};

use super::workers::{join_transformers, join_writers, partition_writer, transform_worker, Route};
use super::{RunContext, RunReport};
use crate::error::Result;

pub(super) async fn run(
    transformers: usize,
    ctx: RunContext,
    input: mpsc::Receiver<Record>,
) -> Result<RunReport> {
    let halt = ctx.shutdown.child();
    let mut routes = Vec::with_capacity(PartitionKey::ALL.len());
    let mut writers = Vec::with_capacity(PartitionKey::ALL.len());

    for partition in PartitionKey::ALL {
        let (tx, rx) = mpsc::channel::<String>(ctx.settings.queue_capacity);
        routes.push(tx);
        writers.push((
            partition,
            tokio::spawn(partition_writer(
                partition,
                rx,
                std::convert::identity,
                ctx.settings.flush_threshold,
                ctx.settings.trailing,
                ctx.flush.clone(),
                halt.clone(),
            )),
        ));
    }

    let input = Arc::new(Mutex::new(input));
    let handles: Vec<_> = (0..transformers)
        .map(|worker| {
            tokio::spawn(transform_worker(
                worker,
                Arc::clone(&input),
                Route::PerPartition(routes.clone()),
                halt.clone(),
            ))
        })
        .collect();
    // Writers finish once every transformer has dropped its senders.
    drop(routes);

    let transformed = join_transformers(handles).await;
    let partitions = join_writers(writers).await?;
    let transformed = transformed?;

    Ok(RunReport {
        records: transformed.records,
        unclassified: transformed.unclassified,
        cancelled: transformed.cancelled && ctx.shutdown.is_shutdown(),
        partitions,
        ..RunReport::new(ctx.topology)
    })
}
