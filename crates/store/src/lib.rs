//! `ledgerforge-store` — the mutable ledger workbook.
//!
//! Sheets of sparse cells with formula-aware write guards, bulk range
//! access, and XLSX load/save. No formula evaluation: the surrounding
//! reporting toolchain owns recalculation; this store only needs to know
//! *that* a cell holds a formula so pipeline writes never clobber one.

pub mod cell;
pub mod error;
pub mod sheet;
pub mod workbook;
pub mod xlsx;

pub use cell::{Cell, CellValue};
pub use error::StoreError;
pub use sheet::Sheet;
pub use workbook::Workbook;
