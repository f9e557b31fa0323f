//! Pipeline orchestrator: `Init → Stage[1..17] → Teardown`.
//!
//! Strictly sequential; a stage never re-runs and is never skipped by
//! control flow (subset stages skip by data). A stage body that fails
//! becomes one exception record tagged with that stage, and the run
//! continues. Only ledger-store acquisition aborts. Teardown — save the
//! workbook, write the exception report — executes on every exit route.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledgerforge_enrich::{EnrichmentService, RetryPolicy};
use ledgerforge_sources::SourceTable;
use ledgerforge_store::{xlsx, CellValue, Workbook};
use tracing::{error, info, warn};

use crate::classify::{
    classify_clients, classify_collateral, classify_loan_types, CollateralLists, LoanTypeMaps,
};
use crate::config::{RunConfig, DEFAULT_REFERENCE_RATE};
use crate::derive::{derive_loan_metrics, derive_rate_terms};
use crate::error::EngineError;
use crate::exceptions::{ExceptionTracker, REPORT_HEADERS};
use crate::gateway::{fill_missing_fields, fill_missing_valuations};
use crate::join::{apply_join, keyed_rows, tiered_fill, JoinSpec, KeyedRow, Tier};
use crate::model::{category_code, col, StageId};
use crate::normalize::{normalize, valid_amount};
use crate::reclassify::relocate_special_rows;
use crate::validate::{blank_sweep, control_total_check, percent_rescale, rate_floor_check};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Pre-loaded source tables. Each is read once by its consuming stage and
/// holds no other state.
pub struct PipelineInput {
    pub registry: SourceTable,
    pub portfolio: SourceTable,
    pub credit: SourceTable,
    pub working: SourceTable,
    pub property_list: SourceTable,
    pub categories: SourceTable,
    pub sale_listing: SourceTable,
    /// Absent some months; "no data available", not an error.
    pub recovery: Option<SourceTable>,
    pub prior_working: SourceTable,
    /// Resolved reference minimum rate (decimal), when the soft dependency
    /// could be read.
    pub reference_rate: Option<f64>,
}

pub struct Services<'a> {
    pub fields: &'a dyn EnrichmentService,
    pub valuation: &'a dyn EnrichmentService,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Ledger store could not be acquired; stages never ran.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageId,
    pub soft_failed: bool,
    pub detail: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stages: Vec<StageReport>,
    pub exceptions: Vec<crate::exceptions::ExceptionRecord>,
    pub ledger_path: PathBuf,
    pub report_path: PathBuf,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.exceptions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

/// Acquire the ledger store, run all 17 stages, and tear down. The
/// exception report is written on every exit route, the workbook on every
/// route where it was acquired.
pub fn execute(config: &RunConfig, input: &PipelineInput, services: &Services<'_>) -> RunReport {
    let ledger_path = PathBuf::from(&config.ledger.file);
    let report_path = report_path(config, &ledger_path);
    let mut tracker = ExceptionTracker::new();

    info!(run = %config.name, ledger = %ledger_path.display(), "pipeline starting");

    let mut workbook = match xlsx::load(&ledger_path) {
        Ok(wb) => wb,
        Err(e) => {
            let fatal = EngineError::StoreAcquire(e.to_string());
            error!(%fatal, "aborting run");
            tracker.record_raw("init", &fatal.to_string(), None);
            write_report(&report_path, &tracker);
            return RunReport {
                outcome: RunOutcome::Aborted,
                stages: Vec::new(),
                exceptions: tracker.records().to_vec(),
                ledger_path,
                report_path,
            };
        }
    };

    let stages = run_stages(config, &mut workbook, input, services, &mut tracker);

    // Teardown: always save, always report.
    if let Err(e) = xlsx::save(&workbook, &ledger_path) {
        tracker.record_raw("teardown", &format!("failed to save ledger: {e}"), None);
        error!(error = %e, "failed to save ledger workbook");
    }
    write_report(&report_path, &tracker);

    info!(exceptions = tracker.len(), "pipeline finished");

    RunReport {
        outcome: RunOutcome::Completed,
        stages,
        exceptions: tracker.records().to_vec(),
        ledger_path,
        report_path,
    }
}

fn report_path(config: &RunConfig, ledger_path: &Path) -> PathBuf {
    let file = Path::new(&config.validation.report_file);
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        ledger_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(file)
    }
}

fn write_report(path: &Path, tracker: &ExceptionTracker) {
    let rows = tracker.report_rows();
    if let Err(e) = xlsx::write_table(path, "Exceptions", &REPORT_HEADERS, &rows) {
        error!(error = %e, path = %path.display(), "failed to write exception report");
    } else {
        info!(records = rows.len(), path = %path.display(), "exception report written");
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Run stages 1–17 against an already-acquired workbook. Exposed separately
/// so tests can drive the pipeline against in-memory workbooks.
pub fn run_stages(
    config: &RunConfig,
    workbook: &mut Workbook,
    input: &PipelineInput,
    services: &Services<'_>,
    tracker: &mut ExceptionTracker,
) -> Vec<StageReport> {
    let mut reports = Vec::with_capacity(StageId::ALL.len());

    for stage in StageId::ALL {
        let result = run_stage(stage, config, workbook, input, services, tracker);
        match result {
            Ok(detail) => {
                info!(stage = %stage, %detail, "stage complete");
                reports.push(StageReport { stage, soft_failed: false, detail });
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "stage failed; continuing");
                tracker.record_raw(stage.label(), &e.to_string(), None);
                reports.push(StageReport {
                    stage,
                    soft_failed: true,
                    detail: e.to_string(),
                });
            }
        }
    }

    reports
}

fn run_stage(
    stage: StageId,
    config: &RunConfig,
    workbook: &mut Workbook,
    input: &PipelineInput,
    services: &Services<'_>,
    tracker: &mut ExceptionTracker,
) -> Result<String, EngineError> {
    let data_start = config.ledger.data_start();
    let ledger_name = config.ledger.sheet.clone();

    match stage {
        StageId::Seed => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let src = &config.sources.registry;
            let mut existing: HashSet<String> = keyed_rows(sheet, data_start)
                .into_iter()
                .map(|k| k.norm)
                .collect();
            let mut next_row = sheet
                .last_used_row(col::CONTRACT_ID)
                .map(|r| r + 1)
                .unwrap_or(data_start)
                .max(data_start);

            let mut seeded = 0;
            for row in src.skip_rows..input.registry.num_rows() {
                let raw = input.registry.cell(row, src.key_column.0).trim();
                if raw.is_empty() {
                    continue;
                }
                if let Some(norm) = normalize(raw) {
                    if !existing.insert(norm) {
                        continue;
                    }
                }
                // Identifiers and tags are text even when they look numeric;
                // a `00` product prefix must not collapse to `0`.
                sheet.set_cell(next_row, col::CONTRACT_ID, CellValue::Text(raw.to_string()));
                sheet.set_cell(next_row, col::CATEGORY_TAG, CellValue::Text(category_code(raw)));
                let amount = input.registry.cell(row, src.amount_column.0).trim();
                if !amount.is_empty() {
                    sheet.set_if_blank(next_row, col::DISBURSED_AMOUNT, amount);
                }
                let rate = input.registry.cell(row, src.rate_column.0).trim();
                if !rate.is_empty() {
                    sheet.set_if_blank(next_row, col::BASE_RATE, rate);
                }
                next_row += 1;
                seeded += 1;
            }
            Ok(format!("{seeded} rows seeded"))
        }

        StageId::PortfolioJoin => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let src = &config.sources.portfolio;
            let cols = &src.columns;
            let specs = [
                JoinSpec { value_col: cols.client_code.0, target_field: col::CLIENT_CODE },
                JoinSpec { value_col: cols.equipment.0, target_field: col::EQUIPMENT },
                JoinSpec { value_col: cols.purpose.0, target_field: col::PURPOSE },
                JoinSpec { value_col: cols.frequency.0, target_field: col::FREQUENCY },
                JoinSpec { value_col: cols.period.0, target_field: col::PERIOD },
                JoinSpec { value_col: cols.contract_rate.0, target_field: col::CONTRACT_RATE },
                JoinSpec { value_col: cols.contract_amount.0, target_field: col::CONTRACT_AMOUNT },
            ];
            let stats = apply_join(
                sheet,
                data_start,
                &input.portfolio,
                src.key_column.0,
                src.skip_rows,
                &specs,
            );
            Ok(format!(
                "{} of {} rows matched, {} cells filled",
                stats.rows_matched, stats.rows_considered, stats.cells_filled
            ))
        }

        StageId::EnterpriseJoin => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let src = &config.sources.credit;
            let stats = apply_join(
                sheet,
                data_start,
                &input.credit,
                src.key_column.0,
                src.skip_rows,
                &[JoinSpec { value_col: src.class_column.0, target_field: col::ENTERPRISE_CLASS }],
            );
            // Rows the credit extract does not cover are class "0".
            let mut defaulted = 0;
            for keyed in keyed_rows(sheet, data_start) {
                if sheet.set_if_blank(keyed.row, col::ENTERPRISE_CLASS, "0") {
                    defaulted += 1;
                }
            }
            Ok(format!("{} filled, {defaulted} defaulted", stats.cells_filled))
        }

        StageId::ExposureJoin => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let src = &config.sources.working;
            let stats = apply_join(
                sheet,
                data_start,
                &input.working,
                src.key_column.0,
                src.skip_rows,
                &[
                    JoinSpec { value_col: src.exposure_column.0, target_field: col::GROSS_EXPOSURE },
                    JoinSpec { value_col: src.risk_column.0, target_field: col::RISK_CATEGORY },
                ],
            );

            // Risk category falls back to the equipment-derived mapping.
            let cat = &config.sources.categories;
            let equipment_map: std::collections::HashMap<String, String> = (cat.skip_rows
                ..input.categories.num_rows())
                .filter_map(|row| {
                    let key = input.categories.cell(row, cat.equipment_key_column.0).trim();
                    let label = input.categories.cell(row, cat.equipment_label_column.0).trim();
                    if key.is_empty() || label.is_empty() {
                        None
                    } else {
                        Some((key.to_string(), label.to_string()))
                    }
                })
                .collect();

            let mut fallbacks = 0;
            for keyed in keyed_rows(sheet, data_start) {
                if !sheet.is_blank(keyed.row, col::RISK_CATEGORY) {
                    continue;
                }
                let equipment = sheet.get_display(keyed.row, col::EQUIPMENT);
                if let Some(label) = equipment_map.get(equipment.trim()) {
                    if sheet.set_if_blank(keyed.row, col::RISK_CATEGORY, label) {
                        fallbacks += 1;
                    }
                }
            }
            Ok(format!(
                "{} cells filled, {fallbacks} risk categories from equipment",
                stats.cells_filled
            ))
        }

        StageId::Reclassify => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let stats = relocate_special_rows(sheet, data_start);
            Ok(format!("{} rows relocated", stats.relocated))
        }

        StageId::RateTerms => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let filled = derive_rate_terms(sheet, data_start);
            Ok(format!("{filled} cells derived"))
        }

        StageId::EnrichMissing => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let policy = retry_policy(config);
            let stats =
                fill_missing_fields(sheet, data_start, services.fields, &policy, tracker);
            Ok(format!(
                "{} ids batched, {} unresolved after {} attempt(s)",
                stats.batched_ids, stats.unresolved_ids, stats.attempts
            ))
        }

        StageId::ClientClass => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let classified = classify_clients(sheet, data_start);
            Ok(format!("{classified} rows classified"))
        }

        StageId::LoanType => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let cat = &config.sources.categories;
            let maps = LoanTypeMaps::from_table(
                &input.categories,
                cat.special_key_column.0,
                cat.special_label_column.0,
                cat.composite_key_column.0,
                cat.composite_label_column.0,
                cat.skip_rows,
            );
            let classified = classify_loan_types(sheet, data_start, &maps, tracker);
            Ok(format!("{classified} rows classified"))
        }

        StageId::CollateralClass => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let cat = &config.sources.categories;
            let prop = &config.sources.property_list;
            let lists = CollateralLists::new(
                &input.property_list,
                prop.key_column.0,
                prop.skip_rows,
                &input.categories,
                cat.vehicle_column.0,
                cat.skip_rows,
            );
            let classified = classify_collateral(sheet, data_start, &lists);
            Ok(format!("{classified} rows classified"))
        }

        StageId::ValuationTiers => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let candidates = valuation_candidates(sheet, data_start);
            let total = candidates.len();

            let sale = &config.sources.sale_listing;
            let prior = &config.sources.prior_working;
            let recovery_tier = match (&config.sources.recovery, &input.recovery) {
                (Some(src), Some(table)) => Some(Tier {
                    label: "recovery",
                    table,
                    key_col: src.key_column.0,
                    value_col: src.value_column.0,
                    skip_rows: src.skip_rows,
                }),
                _ => None,
            };

            let remaining = tiered_fill(
                sheet,
                &candidates,
                col::VALUATION,
                &[
                    Some(Tier {
                        label: "sale_listing",
                        table: &input.sale_listing,
                        key_col: sale.key_column.0,
                        value_col: sale.value_column.0,
                        skip_rows: sale.skip_rows,
                    }),
                    recovery_tier,
                    Some(Tier {
                        label: "prior_working",
                        table: &input.prior_working,
                        key_col: prior.key_column.0,
                        value_col: prior.value_column.0,
                        skip_rows: prior.skip_rows,
                    }),
                ],
            );
            Ok(format!("{} of {total} resolved by tiers", total - remaining.len()))
        }

        StageId::EnrichValuation => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let candidates = valuation_candidates(sheet, data_start);
            let policy = retry_policy(config);
            let stats =
                fill_missing_valuations(sheet, &candidates, services.valuation, &policy, tracker);
            Ok(format!(
                "{} ids batched, {} unresolved after {} attempt(s)",
                stats.batched_ids, stats.unresolved_ids, stats.attempts
            ))
        }

        StageId::LoanMetrics => {
            let sheet = workbook.sheet_mut(&ledger_name);
            let filled = derive_loan_metrics(sheet, data_start);
            Ok(format!("{filled} cells derived"))
        }

        StageId::BlankSweep => {
            let sheet = workbook.sheet(&ledger_name).map_err(stage_err)?;
            let excluded = config.validation.excluded_cols();
            let found = blank_sweep(sheet, data_start, &excluded, tracker);
            Ok(format!("{found} blank cells"))
        }

        StageId::RateFloorCheck => {
            let sheet = workbook.sheet(&ledger_name).map_err(stage_err)?;
            let reference = input
                .reference_rate
                .or(config.validation.reference_rate)
                .unwrap_or(DEFAULT_REFERENCE_RATE);
            let found = rate_floor_check(sheet, data_start, reference, tracker);
            Ok(format!("{found} violations against {reference}"))
        }

        StageId::ControlTotal => {
            let summary = workbook
                .sheet(&config.ledger.summary_sheet)
                .map_err(stage_err)?;
            let clean = control_total_check(summary, config.ledger.control_cell, tracker);
            Ok(if clean { "control total is zero".into() } else { "control total mismatch".into() })
        }

        StageId::PercentRescale => {
            let rescaled = percent_rescale(
                workbook,
                &ledger_name,
                &config.ledger.summary_sheet,
                config.ledger.rescale_marker_cell,
                &config.validation.percent_cols(),
                data_start,
            );
            Ok(format!("{rescaled} cells rescaled"))
        }
    }
}

fn stage_err(e: ledgerforge_store::StoreError) -> EngineError {
    EngineError::Stage(e.to_string())
}

fn retry_policy(config: &RunConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.retry.max_attempts,
        Duration::from_millis(config.retry.base_delay_ms),
    )
}

/// Vehicle-collateral rows whose valuation is still blank, zero, or a
/// placeholder marker.
fn valuation_candidates(
    sheet: &ledgerforge_store::Sheet,
    data_start: usize,
) -> Vec<KeyedRow> {
    keyed_rows(sheet, data_start)
        .into_iter()
        .filter(|keyed| {
            sheet.get_display(keyed.row, col::COLLATERAL_CLASS).trim()
                == crate::classify::COLLATERAL_VEHICLES
        })
        .filter(|keyed| {
            valid_amount(&sheet.get_display(keyed.row, col::VALUATION)).is_none()
                && !sheet.is_formula(keyed.row, col::VALUATION)
        })
        .collect()
}
