//! Turning tabular inputs into records for storage.
//!
//! - [`csv`]: one JSON object per row, keyed by header
//! - [`json`]: NDJSON, one record per line

pub mod csv;
pub mod json;

pub use self::csv::{records_from_csv_path, records_from_csv_reader};
pub use self::json::{records_from_ndjson, records_from_ndjson_path, records_from_ndjson_str};
