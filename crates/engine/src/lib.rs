//! `ledgerforge-engine` — the ledger enrichment pipeline.
//!
//! Pure pipeline crate: receives the opened ledger workbook, pre-loaded
//! source tables, and enrichment service handles; mutates the ledger and
//! returns the run report. No HTTP and no terminal IO in here.
//!
//! Seventeen ordered stages over one shared workbook: seed, joins,
//! reclassification, enrichment, derivations, then validation. Expected
//! data gaps are never errors — they become [`ExceptionRecord`]s and the
//! run continues.

pub mod classify;
pub mod config;
pub mod derive;
pub mod error;
pub mod exceptions;
pub mod gateway;
pub mod join;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod reclassify;
pub mod validate;

pub use config::RunConfig;
pub use error::EngineError;
pub use exceptions::{ExceptionRecord, ExceptionTracker};
pub use model::StageId;
pub use pipeline::{execute, run_stages, PipelineInput, RunOutcome, RunReport, Services};
