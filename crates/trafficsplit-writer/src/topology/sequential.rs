//! Capacity 0: classify, serialize and append on the caller's task.
//!
//! The only topology with a total order on the output stream: batches are
//! published in exactly the order their thresholds were crossed.

use tokio::sync::mpsc;
use trafficsplit_core::{classify, serialize, Classification, Record};

use super::workers::{next_record, note_unclassified, Next};
use super::{RunContext, RunReport};
use crate::batch::BatchStore;
use crate::error::Result;

pub(super) async fn run(ctx: RunContext, mut input: mpsc::Receiver<Record>) -> Result<RunReport> {
    let mut report = RunReport::new(ctx.topology);
    let mut store = BatchStore::new(ctx.settings.flush_threshold);

    loop {
        let record = match next_record(&mut input, &ctx.shutdown).await {
            Next::Record(record) => record,
            Next::Closed => break,
            Next::Cancelled => {
                report.cancelled = true;
                break;
            }
        };
        report.records += 1;

        match classify(record.traffic_usage) {
            Classification::Partition(partition) => {
                store
                    .append(partition, serialize(&record), &ctx.flush)
                    .await?
            }
            Classification::Unclassified => {
                report.unclassified += 1;
                note_unclassified(&record);
            }
        }
    }

    report.partitions = store.finish(ctx.settings.trailing, &ctx.flush).await?;
    Ok(report)
}
