// trafficsplit - Split broker traffic records into usage-range partition files
//
// Pipeline: JSON Lines input -> bounded record queue -> PartitionWriter
// (topology picked from writer.capacity) -> partition files + output stream.
//
// The output stream is drained here and each persisted batch is logged.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use trafficsplit_config::RuntimeConfig;
use trafficsplit_core::Record;
use trafficsplit_writer::{FlushedBatch, FsSink, PartitionWriter, RunReport, ShutdownHandle};

mod init;

pub use init::init_tracing;

/// Where records are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// `-` means stdin, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            InputSource::Stdin
        } else {
            InputSource::File(PathBuf::from(arg))
        }
    }

    pub async fn open(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        match self {
            InputSource::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
            InputSource::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input file: {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Input-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    /// Non-empty lines read.
    pub lines: u64,
    /// Lines that did not decode as a record and were skipped.
    pub malformed: u64,
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub input: InputStats,
    pub report: RunReport,
    /// Batches received on the output stream.
    pub published_batches: u64,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping input and draining queued records...");
        },
        _ = terminate => {
            info!("Received SIGTERM, stopping input and draining queued records...");
        },
    }
}

/// Entry point with automatically loaded configuration.
pub async fn run(input: InputSource) -> Result<RunSummary> {
    let config = RuntimeConfig::load().context("Failed to load configuration")?;
    run_with_config(config, input).await
}

/// Entry point with pre-loaded configuration (for CLI usage).
/// Ctrl+C or SIGTERM cancels the run.
pub async fn run_with_config(config: RuntimeConfig, input: InputSource) -> Result<RunSummary> {
    let reader = input.open().await?;
    run_until(config, reader, shutdown_signal()).await
}

/// Run the pipeline over `input` until it ends or `stop` resolves.
pub async fn run_until<R, S>(config: RuntimeConfig, input: R, stop: S) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    S: Future<Output = ()> + Send + 'static,
{
    init_tracing(&config);
    config.validate().context("Invalid configuration")?;

    let sink = FsSink::from_config(&config.storage);
    sink.prepare().await.with_context(|| {
        format!(
            "Failed to prepare partition files in {}",
            sink.root().display()
        )
    })?;

    let queue_capacity = config.writer.queue_capacity;
    let (output_tx, output_rx) = mpsc::channel(queue_capacity);
    let writer = PartitionWriter::from_config(&config, Arc::new(sink), output_tx)
        .context("Failed to build partition writer")?;
    let shutdown = writer.shutdown_handle();

    let (record_tx, record_rx) = mpsc::channel(queue_capacity);
    let producer = tokio::spawn(read_records(input, record_tx, shutdown.clone()));
    let drain = tokio::spawn(drain_output(output_rx));
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            stop.await;
            shutdown.shutdown();
        })
    };

    let result = writer.run(record_rx).await;
    signal_task.abort();
    // Releases a producer still waiting on input after an early stop.
    shutdown.shutdown();

    let input_stats = producer.await.context("Input reader task failed")?;
    let published_batches = drain.await.context("Output drain task failed")?;
    let report = result.context("Partitioned write failed")?;
    let input_stats = input_stats?;

    Ok(RunSummary {
        input: input_stats,
        report,
        published_batches,
    })
}

/// Decode JSON Lines into records until input ends or the run stops.
async fn read_records<R>(
    input: R,
    records: mpsc::Sender<Record>,
    shutdown: ShutdownHandle,
) -> Result<InputStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stats = InputStats::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read input")?,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        match serde_json::from_str::<Record>(line) {
            Ok(record) => {
                if records.send(record).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed input line");
            }
        }
    }

    Ok(stats)
}

async fn drain_output(mut output: mpsc::Receiver<FlushedBatch>) -> u64 {
    let mut published = 0;
    while let Some(batch) = output.recv().await {
        published += 1;
        info!(
            partition = %batch.partition,
            lines = batch.lines.len(),
            "Batch persisted"
        );
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_means_stdin() {
        assert_eq!(InputSource::from_arg("-"), InputSource::Stdin);
        assert_eq!(
            InputSource::from_arg("records.jsonl"),
            InputSource::File(PathBuf::from("records.jsonl"))
        );
    }

    #[tokio::test]
    async fn malformed_and_blank_lines_are_skipped() {
        let input = concat!(
            r#"{"user_name":"a","id":1,"traffic_usage":10,"ip":"1.1.1.1","port":"1","mac":"m"}"#,
            "\n\nnot json\n",
            r#"{"user_name":"b","id":2,"traffic_usage":20,"ip":"1.1.1.1","port":"1"}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let stats = read_records(input.as_bytes(), tx, ShutdownHandle::new())
            .await
            .unwrap();

        assert_eq!(stats, InputStats { lines: 3, malformed: 1 });
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(rx.recv().await.unwrap().id, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn missing_input_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = InputSource::File(dir.path().join("absent.jsonl"));
        let err = source.open().await.err().unwrap();
        assert!(err.to_string().contains("Failed to open input file"));
    }
}
