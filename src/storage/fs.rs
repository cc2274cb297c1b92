use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ComputeError, ComputeResult};
use crate::types::NodeId;

use super::framing::{write_frames, FramedRangeReader};
use super::{RecordReader, StorageAccessor};

/// One framed file per dataset under `root`, all held by a fixed node list.
///
/// Dataset names map directly to file names; names containing path separators are rejected.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
    nodes: Vec<NodeId>,
}

impl DirectoryStorage {
    pub fn new(root: impl AsRef<Path>, nodes: Vec<NodeId>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            nodes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create or truncate `name` and write `records` to it. Returns the dataset length.
    pub fn write_dataset<I, R>(&self, name: &str, records: I) -> ComputeResult<u64>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let path = self.path_of(name)?;
        let mut writer = BufWriter::new(File::create(path)?);
        let written = write_frames(&mut writer, records)?;
        writer.flush()?;
        Ok(written)
    }

    /// Append `records` to an existing dataset.
    pub fn append_records<I, R>(&self, name: &str, records: I) -> ComputeResult<u64>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let path = self.existing_path(name)?;
        let mut writer = BufWriter::new(OpenOptions::new().append(true).open(path)?);
        let written = write_frames(&mut writer, records)?;
        writer.flush()?;
        Ok(written)
    }

    /// Names of all datasets under the root, sorted.
    pub fn datasets(&self) -> ComputeResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_of(&self, name: &str) -> ComputeResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(unknown(name));
        }
        Ok(self.root.join(name))
    }

    fn existing_path(&self, name: &str) -> ComputeResult<PathBuf> {
        let path = self.path_of(name)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(unknown(name))
        }
    }
}

impl StorageAccessor for DirectoryStorage {
    fn nodes_for(&self, dataset: &str) -> ComputeResult<Vec<NodeId>> {
        self.existing_path(dataset)?;
        Ok(self.nodes.clone())
    }

    fn length_of(&self, dataset: &str) -> ComputeResult<u64> {
        let path = self.existing_path(dataset)?;
        Ok(fs::metadata(path)?.len())
    }

    fn open_range(&self, dataset: &str, start: u64, end: u64) -> ComputeResult<RecordReader> {
        let path = self.existing_path(dataset)?;
        let file = BufReader::new(File::open(path)?);
        Ok(Box::new(FramedRangeReader::new(file, start, end)?))
    }
}

fn unknown(name: &str) -> ComputeError {
    ComputeError::UnknownDataset {
        name: name.to_string(),
    }
}
