//! CSV to record conversion.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::ComputeResult;
use crate::types::Record;

/// Read a headed CSV file into records, one JSON object per row.
///
/// Rows may have fewer or more fields than the header; see [`records_from_csv_reader`].
pub fn records_from_csv_path(path: impl AsRef<Path>) -> ComputeResult<Vec<Record>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    records_from_csv_reader(&mut rdr)
}

/// Convert every row of `rdr` into a JSON object keyed by header name.
///
/// Cells are kept as JSON strings (trimmed); interpreting them is up to the pipeline's
/// stages. With a flexible reader, rows shorter than the header get empty strings for the
/// missing columns and fields past the last header are ignored; a strict reader rejects
/// such rows.
pub fn records_from_csv_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
) -> ComputeResult<Vec<Record>> {
    let headers = rdr.headers()?.clone();

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result?;
        let mut object = Map::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            let raw = row.get(idx).unwrap_or("");
            object.insert(name.to_owned(), Value::String(raw.trim().to_owned()));
        }
        records.push(serde_json::to_vec(&Value::Object(object))?);
    }
    Ok(records)
}
