use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ComputeError, ComputeResult};
use crate::types::NodeId;

use super::framing::{encode_frames, FramedRangeReader};
use super::{RecordReader, StorageAccessor};

struct StoredDataset {
    nodes: Vec<NodeId>,
    bytes: Arc<[u8]>,
}

/// Framed datasets held in memory.
///
/// Readers get a shared snapshot of the bytes, so appends never disturb in-flight reads.
#[derive(Default)]
pub struct InMemoryStorage {
    datasets: RwLock<HashMap<String, StoredDataset>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace `name` with `records`, held by `nodes`.
    ///
    /// Fails without touching the dataset if a record is too large to frame.
    pub fn insert<I, R>(
        &self,
        name: impl Into<String>,
        nodes: Vec<NodeId>,
        records: I,
    ) -> ComputeResult<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let bytes = encode_frames(records)?;
        self.insert_raw(name, nodes, bytes);
        Ok(())
    }

    /// Create or replace `name` with pre-framed bytes.
    pub fn insert_raw(&self, name: impl Into<String>, nodes: Vec<NodeId>, bytes: Vec<u8>) {
        let mut datasets = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        datasets.insert(
            name.into(),
            StoredDataset {
                nodes,
                bytes: Arc::from(bytes),
            },
        );
    }

    /// Append records to an existing dataset.
    pub fn append<I, R>(&self, name: &str, records: I) -> ComputeResult<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let framed = encode_frames(records)?;
        let mut datasets = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        let dataset = datasets.get_mut(name).ok_or_else(|| unknown(name))?;
        let mut bytes = dataset.bytes.to_vec();
        bytes.extend_from_slice(&framed);
        dataset.bytes = Arc::from(bytes);
        Ok(())
    }

    fn with_dataset<T>(&self, name: &str, f: impl FnOnce(&StoredDataset) -> T) -> ComputeResult<T> {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        datasets.get(name).map(f).ok_or_else(|| unknown(name))
    }
}

impl fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryStorage")
            .field("datasets_len", &datasets.len())
            .finish()
    }
}

impl StorageAccessor for InMemoryStorage {
    fn nodes_for(&self, dataset: &str) -> ComputeResult<Vec<NodeId>> {
        self.with_dataset(dataset, |d| d.nodes.clone())
    }

    fn length_of(&self, dataset: &str) -> ComputeResult<u64> {
        self.with_dataset(dataset, |d| d.bytes.len() as u64)
    }

    fn open_range(&self, dataset: &str, start: u64, end: u64) -> ComputeResult<RecordReader> {
        let bytes = self.with_dataset(dataset, |d| Arc::clone(&d.bytes))?;
        let reader = FramedRangeReader::new(Cursor::new(bytes), start, end)?;
        Ok(Box::new(reader))
    }
}

fn unknown(name: &str) -> ComputeError {
    ComputeError::UnknownDataset {
        name: name.to_string(),
    }
}
