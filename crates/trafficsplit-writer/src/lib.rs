//! Partitioned streaming writer.
//!
//! Classifies incoming records, buffers their serialized lines per partition,
//! appends every full batch to the partition's file and publishes it on an
//! output stream once the write is durable.
//!
//! The same primitives are scheduled by four topologies (see [`Topology`]),
//! selected once from a concurrency capacity.

mod batch;
mod error;
mod retry;
mod shutdown;
mod storage;
mod topology;

pub use batch::{BatchStore, FlushedBatch, PartitionBatch, PartitionStats};
pub use error::{ErrorCode, Result, WriterError};
pub use retry::{is_transient, RetryPolicy};
pub use shutdown::ShutdownHandle;
pub use storage::{BatchSink, FsSink};
pub use topology::{PartitionWriter, RunReport, Topology, WriterSettings};
pub use trafficsplit_config::TrailingPolicy;
