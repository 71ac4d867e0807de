//! End-to-end runs of every topology against real partition files.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trafficsplit_core::{serialize, PartitionKey, Record};
use trafficsplit_writer::{
    BatchSink, FlushedBatch, FsSink, PartitionWriter, RetryPolicy, RunReport, TrailingPolicy,
    WriterError, WriterSettings,
};

const CAPACITIES: [i64; 5] = [0, 1, 4, 5, 12];

fn record(id: i64, usage: i64) -> Record {
    Record::new(
        format!("user{id}"),
        id,
        usage,
        "10.0.0.1",
        "8080",
        "aa:bb:cc",
    )
}

fn settings() -> WriterSettings {
    WriterSettings {
        retry: RetryPolicy::none(),
        ..WriterSettings::default()
    }
}

fn collect_output(mut rx: mpsc::Receiver<FlushedBatch>) -> JoinHandle<Vec<FlushedBatch>> {
    tokio::spawn(async move {
        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }
        batches
    })
}

async fn run_records(
    capacity: i64,
    settings: WriterSettings,
    sink: Arc<dyn BatchSink>,
    records: Vec<Record>,
) -> (Result<RunReport, WriterError>, Vec<FlushedBatch>) {
    let (output, output_rx) = mpsc::channel(16);
    let collector = collect_output(output_rx);
    let writer = PartitionWriter::new(capacity, settings, sink, output).unwrap();

    let (input, input_rx) = mpsc::channel(8);
    let producer = tokio::spawn(async move {
        for record in records {
            if input.send(record).await.is_err() {
                break;
            }
        }
    });

    let result = writer.run(input_rx).await;
    producer.await.unwrap();
    (result, collector.await.unwrap())
}

async fn fs_sink(dir: &Path) -> Arc<FsSink> {
    let sink = FsSink::new(dir, true);
    sink.prepare().await.unwrap();
    Arc::new(sink)
}

fn read_partition(dir: &Path, partition: PartitionKey) -> Vec<String> {
    std::fs::read_to_string(dir.join(partition.file_name()))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

#[tokio::test]
async fn sequential_flushes_full_batches_and_reports_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Record> = (0..7).map(|id| record(id, 50)).collect();
    let expected: Vec<String> = records.iter().take(5).map(serialize).collect();

    let (result, batches) = run_records(0, settings(), fs_sink(dir.path()).await, records).await;
    let report = result.unwrap();

    assert_eq!(report.records, 7);
    assert_eq!(report.total_flushes(), 1);
    assert_eq!(report.partition(PartitionKey::P0To100).pending_lines, 2);
    assert!(!report.cancelled);

    assert_eq!(read_partition(dir.path(), PartitionKey::P0To100), expected);
    assert_eq!(
        batches,
        vec![FlushedBatch {
            partition: PartitionKey::P0To100,
            lines: expected,
        }]
    );
}

#[tokio::test]
async fn hybrid_matches_sequential_content_per_partition() {
    let usages = [50, 300, 700, 1200];
    let records: Vec<Record> = (0..20)
        .map(|id| record(id, usages[id as usize % 4]))
        .collect();

    let seq_dir = tempfile::tempdir().unwrap();
    let (seq, _) = run_records(0, settings(), fs_sink(seq_dir.path()).await, records.clone()).await;
    let seq = seq.unwrap();

    let hybrid_dir = tempfile::tempdir().unwrap();
    let (hybrid, batches) =
        run_records(12, settings(), fs_sink(hybrid_dir.path()).await, records).await;
    let hybrid = hybrid.unwrap();

    assert_eq!(hybrid.total_flushes(), 4);
    assert_eq!(batches.len(), 4);
    for batch in &batches {
        assert_eq!(batch.lines.len(), 5);
    }
    for partition in PartitionKey::ALL {
        assert_eq!(hybrid.partition(partition).persisted_lines, 5);
        assert_eq!(
            sorted(read_partition(hybrid_dir.path(), partition)),
            sorted(read_partition(seq_dir.path(), partition)),
            "{partition} differs"
        );
    }
    assert_eq!(seq.partitions, hybrid.partitions);
}

#[tokio::test]
async fn every_topology_agrees_on_per_partition_counts() {
    let records: Vec<Record> = (0..103).map(|id| record(id, (id * 37) % 1600)).collect();

    let mut reports: BTreeMap<i64, RunReport> = BTreeMap::new();
    for capacity in CAPACITIES {
        let dir = tempfile::tempdir().unwrap();
        let (result, batches) =
            run_records(capacity, settings(), fs_sink(dir.path()).await, records.clone()).await;
        let report = result.unwrap();

        assert_eq!(report.topology.capacity(), capacity);
        assert_eq!(report.records, 103);
        assert_eq!(batches.len() as u64, report.total_flushes());
        for batch in &batches {
            assert_eq!(batch.lines.len(), 5);
        }
        for partition in PartitionKey::ALL {
            let stats = report.partition(partition);
            assert_eq!(
                read_partition(dir.path(), partition).len() as u64,
                stats.persisted_lines
            );
        }
        reports.insert(capacity, report);
    }

    let baseline = &reports[&0];
    for (capacity, report) in &reports {
        assert_eq!(report.partitions, baseline.partitions, "capacity {capacity}");
        assert_eq!(report.unclassified, baseline.unclassified, "capacity {capacity}");
    }
}

#[tokio::test]
async fn unclassified_records_are_counted_not_written() {
    for capacity in CAPACITIES {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record(1, -5),
            record(2, 1501),
            record(3, 100),
            record(4, 9_000),
        ];
        let (result, batches) =
            run_records(capacity, settings(), fs_sink(dir.path()).await, records).await;
        let report = result.unwrap();

        assert_eq!(report.records, 4, "capacity {capacity}");
        assert_eq!(report.unclassified, 3, "capacity {capacity}");
        assert_eq!(report.pending_lines(), 1, "capacity {capacity}");
        assert!(batches.is_empty());
    }
}

#[tokio::test]
async fn trailing_flush_persists_partial_batches() {
    for capacity in CAPACITIES {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record> = (0..8).map(|id| record(id, 600)).collect();
        let settings = WriterSettings {
            trailing: TrailingPolicy::Flush,
            ..settings()
        };

        let (result, batches) =
            run_records(capacity, settings, fs_sink(dir.path()).await, records).await;
        let report = result.unwrap();

        let stats = report.partition(PartitionKey::P501To1000);
        assert_eq!(stats.flushes, 2, "capacity {capacity}");
        assert_eq!(stats.persisted_lines, 8);
        assert_eq!(stats.pending_lines, 0);
        assert_eq!(read_partition(dir.path(), PartitionKey::P501To1000).len(), 8);
        assert_eq!(batches.len(), 2);
    }
}

struct FailingSink {
    partition: PartitionKey,
    inner: FsSink,
}

#[async_trait]
impl BatchSink for FailingSink {
    async fn append(&self, partition: PartitionKey, lines: &[String]) -> io::Result<()> {
        if partition == self.partition {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.inner.append(partition, lines).await
    }
}

#[tokio::test]
async fn write_failure_names_its_partition() {
    for capacity in CAPACITIES {
        let dir = tempfile::tempdir().unwrap();
        let inner = FsSink::new(dir.path(), true);
        inner.prepare().await.unwrap();
        let sink = Arc::new(FailingSink {
            partition: PartitionKey::P101To500,
            inner,
        });
        let records: Vec<Record> = (0..400).map(|id| record(id, 200)).collect();

        let (result, batches) = tokio::time::timeout(
            Duration::from_secs(10),
            run_records(capacity, settings(), sink, records),
        )
        .await
        .expect("run did not stop after a write failure");

        match result.unwrap_err() {
            WriterError::WriteFailure { partition, .. } => {
                assert_eq!(partition, PartitionKey::P101To500, "capacity {capacity}")
            }
            other => panic!("capacity {capacity}: unexpected error {other}"),
        }
        assert!(batches.is_empty());
    }
}

#[tokio::test]
async fn missing_partition_file_fails_without_create() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsSink::new(dir.path(), false));
    let records: Vec<Record> = (0..5).map(|id| record(id, 1400)).collect();

    let (result, _) = run_records(0, settings(), sink, records).await;
    let err = result.unwrap_err();
    assert_eq!(err.partition(), Some(PartitionKey::P1001To1500));
    assert!(!dir.path().join("1001_1500.csv").exists());
}

#[tokio::test]
async fn cancellation_stops_input_and_drains_queued_work() {
    for capacity in CAPACITIES {
        let dir = tempfile::tempdir().unwrap();
        let (output, output_rx) = mpsc::channel(64);
        let collector = collect_output(output_rx);
        let writer =
            PartitionWriter::new(capacity, settings(), fs_sink(dir.path()).await, output).unwrap();
        let shutdown = writer.shutdown_handle();

        // Input stays open; only the shutdown handle can end this run.
        let (input, input_rx) = mpsc::channel(16);
        for id in 0..10 {
            input.send(record(id, 50)).await.unwrap();
        }

        let run = tokio::spawn(writer.run(input_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.shutdown();

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run ignored cancellation")
            .unwrap()
            .unwrap();
        drop(input);

        assert!(report.cancelled, "capacity {capacity}");
        assert_eq!(report.records, 10, "capacity {capacity}");
        let stats = report.partition(PartitionKey::P0To100);
        assert_eq!(stats.persisted_lines, 10);
        assert_eq!(stats.pending_lines, 0);
        assert_eq!(collector.await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn closed_output_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (output, output_rx) = mpsc::channel(1);
    drop(output_rx);
    let writer = PartitionWriter::new(0, settings(), fs_sink(dir.path()).await, output).unwrap();

    let (input, input_rx) = mpsc::channel(8);
    for id in 0..5 {
        input.send(record(id, 10)).await.unwrap();
    }
    drop(input);

    let err = writer.run(input_rx).await.unwrap_err();
    assert!(matches!(err, WriterError::OutputClosed { .. }));
    assert_eq!(read_partition(dir.path(), PartitionKey::P0To100).len(), 5);
}

#[test]
fn unsupported_capacity_is_rejected_before_running() {
    let (output, _rx) = mpsc::channel(1);
    let sink = Arc::new(FsSink::new("unused", false));
    for capacity in [6, 7, 8, -3] {
        let err = PartitionWriter::new(capacity, settings(), sink.clone(), output.clone())
            .err()
            .unwrap();
        assert!(matches!(err, WriterError::InvalidCapacity { .. }));
    }
}
