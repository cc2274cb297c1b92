//! Core data model types: records, node identifiers and dataset segments.
//!
//! A dataset is addressed by name and split into contiguous byte ranges ([`Segment`]s), one per
//! node that holds it. The pipeline itself only ever sees opaque [`Record`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque byte sequence; the unit of data consumed and produced by pipeline stages.
pub type Record = Vec<u8>;

/// Identifier of a node that holds (part of) a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A contiguous byte range `[start, end)` of a named dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Dataset name.
    pub dataset: String,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
}

impl Segment {
    /// Create a segment.
    pub fn new(dataset: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            dataset: dataset.into(),
            start,
            end,
        }
    }

    /// Number of bytes covered by the segment.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.dataset, self.start, self.end)
    }
}

/// Split `length` bytes of `dataset` into `parts` contiguous segments.
///
/// Every segment but the last spans `length / parts` bytes; the last one absorbs the remainder
/// and always ends at `length`. Boundaries are not aligned to records; the record reader decides
/// which segment owns a record that straddles a boundary.
///
/// Returns an empty list when `parts == 0`.
pub fn split_segments(dataset: &str, length: u64, parts: usize) -> Vec<Segment> {
    if parts == 0 {
        return Vec::new();
    }
    let step = length / parts as u64;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0u64;
    for i in 0..parts {
        let end = if i + 1 == parts { length } else { start + step };
        out.push(Segment::new(dataset, start, end));
        start = end;
    }
    out
}
