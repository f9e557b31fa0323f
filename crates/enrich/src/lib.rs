//! `ledgerforge-enrich` — clients for the external contract-enrichment
//! services.
//!
//! Blocking reqwest (no async runtime required). A service accepts a batch
//! of contract ids and returns a *partial* map of field bundles; ids it
//! cannot resolve are simply absent from the response. Services are assumed
//! slow and unreliable — callers go through the gateway's retry wrapper,
//! parameterized by [`RetryPolicy`].

pub mod client;
pub mod retry;

pub use client::{EnrichError, EnrichmentService, FieldBundle, HttpEnrichmentService};
pub use retry::RetryPolicy;
