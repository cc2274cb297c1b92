//! Dataset storage accessors.
//!
//! The coordinator only needs three things from storage: which nodes hold a dataset, how long
//! it is, and a reader for a byte range of it. [`StorageAccessor`] captures that boundary.
//!
//! Implementations:
//! - [`InMemoryStorage`]: framed datasets held in memory (tests, in-process clusters)
//! - [`DirectoryStorage`]: one framed file per dataset under a root directory
//!
//! Both store records with the length-prefixed layout in [`framing`].

pub mod framing;
pub mod fs;
pub mod memory;

use crate::error::ComputeResult;
use crate::execution::CancelToken;
use crate::types::{NodeId, Record, Segment};

pub use fs::DirectoryStorage;
pub use memory::InMemoryStorage;

/// Lazy, forward-only sequence of records.
///
/// End of data is `None`; a read failure is `Some(Err(_))`.
pub type RecordReader = Box<dyn Iterator<Item = ComputeResult<Record>> + Send>;

/// Access to partitioned datasets.
///
/// Segment tasks share one accessor, so implementations must support concurrent reads of
/// different ranges of the same dataset.
pub trait StorageAccessor: Send + Sync {
    /// Nodes believed to hold `dataset`.
    fn nodes_for(&self, dataset: &str) -> ComputeResult<Vec<NodeId>>;

    /// Total length of `dataset` in bytes.
    fn length_of(&self, dataset: &str) -> ComputeResult<u64>;

    /// Reader over the records whose frames start in `[start, end)`.
    fn open_range(&self, dataset: &str, start: u64, end: u64) -> ComputeResult<RecordReader>;
}

/// Materialize every record of `segment`, in order.
///
/// Checks `cancel` before each record.
pub fn read_segment(
    storage: &dyn StorageAccessor,
    segment: &Segment,
    cancel: &CancelToken,
) -> ComputeResult<Vec<Record>> {
    let reader = storage.open_range(&segment.dataset, segment.start, segment.end)?;
    let mut records = Vec::new();
    for record in reader {
        cancel.check()?;
        records.push(record?);
    }
    Ok(records)
}
