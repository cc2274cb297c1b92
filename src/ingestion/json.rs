//! Newline-delimited JSON to record conversion.
//!
//! Each non-blank line must be a JSON value and becomes one record, byte for byte (minus
//! surrounding whitespace).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ComputeError, ComputeResult};
use crate::types::Record;

pub fn records_from_ndjson_path(path: impl AsRef<Path>) -> ComputeResult<Vec<Record>> {
    records_from_ndjson(BufReader::new(File::open(path)?))
}

pub fn records_from_ndjson_str(input: &str) -> ComputeResult<Vec<Record>> {
    records_from_ndjson(input.as_bytes())
}

/// Read NDJSON lines from `reader`, validating each one.
pub fn records_from_ndjson<R: BufRead>(reader: R) -> ComputeResult<Vec<Record>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        serde_json::from_str::<serde::de::IgnoredAny>(line).map_err(|e| {
            ComputeError::InvalidRecord {
                line: i + 1,
                message: e.to_string(),
            }
        })?;
        records.push(line.as_bytes().to_vec());
    }
    Ok(records)
}
