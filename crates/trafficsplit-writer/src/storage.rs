//! Partition file storage.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use trafficsplit_config::StorageConfig;
use trafficsplit_core::PartitionKey;

/// Durable destination for flushed batches.
///
/// `append` must only return `Ok` once every line is durably stored, in order,
/// one line per record.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn append(&self, partition: PartitionKey, lines: &[String]) -> io::Result<()>;
}

/// Append-only partition files under one directory.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
    create_missing: bool,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>, create_missing: bool) -> Self {
        Self {
            root: root.into(),
            create_missing,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.output_dir, config.create_missing)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, partition: PartitionKey) -> PathBuf {
        self.root.join(partition.file_name())
    }

    /// Create the output directory and any missing partition files.
    ///
    /// Only acts when `create_missing` is set; otherwise the files are expected
    /// to exist already and a missing one fails its first flush.
    pub async fn prepare(&self) -> io::Result<()> {
        if !self.create_missing {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.root).await?;
        for partition in PartitionKey::ALL {
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(self.path_for(partition))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSink for FsSink {
    async fn append(&self, partition: PartitionKey, lines: &[String]) -> io::Result<()> {
        let path = self.path_for(partition);
        let mut file = OpenOptions::new()
            .append(true)
            .create(self.create_missing)
            .open(&path)
            .await?;

        let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }

        let len_before = file.metadata().await?.len();
        let result = write_synced(&mut file, buf.as_bytes()).await;
        rollback_on_error(&file, len_before, result).await?;

        tracing::trace!(path = %path.display(), lines = lines.len(), "Appended lines");
        Ok(())
    }
}

async fn write_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Truncate `file` back to `len_before` if the append failed, leaving no
/// partial batch for a retry to duplicate.
async fn rollback_on_error(
    file: &File,
    len_before: u64,
    result: io::Result<()>,
) -> io::Result<()> {
    let Err(e) = result else { return Ok(()) };
    if let Err(rollback) = file.set_len(len_before).await {
        tracing::warn!(error = %rollback, len = len_before, "Failed to roll back partial append");
    }
    Err(e)
}
