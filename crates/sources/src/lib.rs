//! `ledgerforge-sources` — read-only external source tables.
//!
//! Each source is loaded once into a dense [`SourceTable`] (every value a
//! string, numeric cells rendered without a trailing `.0`), then discarded
//! after the consuming stage builds its lookup maps. Heterogeneous schemas
//! are the norm; the table only promises random column access and a full
//! bulk read.

pub mod csv;
pub mod error;
pub mod table;
pub mod xlsx;

pub use error::SourceError;
pub use table::SourceTable;

use std::path::Path;

/// Load a source table, dispatching on file extension.
/// `.csv`/`.tsv`/`.txt` go through the CSV reader (delimiter sniffing),
/// everything else through calamine.
pub fn load(path: &Path) -> Result<SourceTable, SourceError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" | "tsv" | "txt" => csv::import(path),
        _ => xlsx::import(path, None),
    }
}
