// trafficsplit-core - Pure record handling shared by every writer topology
//
// Philosophy: no I/O, no async, no shared state.
// Everything here is a total function over a Record so transform workers can
// run it in parallel without coordination.

pub mod partition;
pub mod record;
pub mod serialize;

pub use partition::{classify, Classification, PartitionKey};
pub use record::Record;
pub use serialize::{serialize, FIELD_DELIMITER};
