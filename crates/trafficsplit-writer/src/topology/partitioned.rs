//! Capacity 5: the run task routes records to four partition writers, one per
//! output file. Serialization happens on the writer side.

use tokio::sync::mpsc;
use trafficsplit_core::{classify, serialize, Classification, PartitionKey, Record};

use super::workers::{join_writers, next_record, note_unclassified, partition_writer, Next};
use super::{RunContext, RunReport};
use crate::error::Result;

pub(super) async fn run(ctx: RunContext, mut input: mpsc::Receiver<Record>) -> Result<RunReport> {
    let halt = ctx.shutdown.child();
    let mut routes = Vec::with_capacity(PartitionKey::ALL.len());
    let mut writers = Vec::with_capacity(PartitionKey::ALL.len());

    for partition in PartitionKey::ALL {
        let (tx, rx) = mpsc::channel::<Record>(ctx.settings.queue_capacity);
        routes.push(tx);
        writers.push((
            partition,
            tokio::spawn(partition_writer(
                partition,
                rx,
                |record: Record| serialize(&record),
                ctx.settings.flush_threshold,
                ctx.settings.trailing,
                ctx.flush.clone(),
                halt.clone(),
            )),
        ));
    }

    let mut report = RunReport::new(ctx.topology);
    loop {
        let record = match next_record(&mut input, &halt).await {
            Next::Record(record) => record,
            Next::Closed => break,
            Next::Cancelled => {
                // The halt also fires on writer failure; that is not a cancellation.
                report.cancelled = ctx.shutdown.is_shutdown();
                break;
            }
        };
        report.records += 1;

        match classify(record.traffic_usage) {
            Classification::Partition(partition) => {
                if routes[partition.index()].send(record).await.is_err() {
                    break;
                }
            }
            Classification::Unclassified => {
                report.unclassified += 1;
                note_unclassified(&record);
            }
        }
    }
    drop(routes);

    report.partitions = join_writers(writers).await?;
    Ok(report)
}
