//! Validation stages: blank sweep, rate-floor threshold, control total,
//! percentage unit cleanup.

use ledgerforge_store::{Sheet, Workbook};
use tracing::info;

use crate::config::CellRef;
use crate::exceptions::ExceptionTracker;
use crate::model::{col, StageId};
use crate::normalize::normalize_cell;

// ---------------------------------------------------------------------------
// Stage 14: blank sweep
// ---------------------------------------------------------------------------

/// One bulk read of the data block; every blank or whitespace-only cell in a
/// keyed row becomes an exception naming that row's key. The two designated
/// columns (legitimately sparse) are excluded.
pub fn blank_sweep(
    sheet: &Sheet,
    data_start: usize,
    excluded: &[usize],
    tracker: &mut ExceptionTracker,
) -> usize {
    let Some(last) = sheet.last_used_row_any() else {
        return 0;
    };
    if last < data_start {
        return 0;
    }

    let block = sheet.read_range(data_start, 0, last, col::COUNT - 1);
    let mut found = 0;

    for row_values in &block {
        let Some(key) = normalize_cell(&row_values[col::CONTRACT_ID]) else {
            continue;
        };
        for (field, value) in row_values.iter().enumerate().skip(1) {
            if excluded.contains(&field) {
                continue;
            }
            if value.is_blank() {
                tracker.record(
                    StageId::BlankSweep,
                    format!("blank {} cell", col::name(field)),
                    Some(key.as_str()),
                );
                found += 1;
            }
        }
    }

    found
}

// ---------------------------------------------------------------------------
// Stage 15: rate-floor threshold
// ---------------------------------------------------------------------------

/// Rates above the reference minimum are anomalies to surface, never to
/// correct. `reference` is a decimal fraction; the ledger's rate column is
/// still in raw percent at this stage.
pub fn rate_floor_check(
    sheet: &Sheet,
    data_start: usize,
    reference: f64,
    tracker: &mut ExceptionTracker,
) -> usize {
    let limit_pct = reference * 100.0;
    let mut found = 0;

    let Some(last) = sheet.last_used_row(col::CONTRACT_ID) else {
        return 0;
    };

    for row in data_start..=last {
        let Some(key) = normalize_cell(sheet.get(row, col::CONTRACT_ID)) else {
            continue;
        };
        let Some(rate) = sheet.get(row, col::RATE_FLOOR).as_number() else {
            continue;
        };
        if rate > limit_pct {
            tracker.record(
                StageId::RateFloorCheck,
                format!("rate floor {rate} exceeds reference {limit_pct}"),
                Some(key.as_str()),
            );
            found += 1;
        }
    }

    if found > 0 {
        info!(found, limit_pct, "rate floor violations");
    }
    found
}

// ---------------------------------------------------------------------------
// Stage 16: control total
// ---------------------------------------------------------------------------

/// The designated summary cell must be exactly zero (blank counts as zero).
/// A mismatch is recorded with the offending value; the ledger is never
/// auto-corrected.
pub fn control_total_check(summary: &Sheet, cell: CellRef, tracker: &mut ExceptionTracker) -> bool {
    let value = summary.get(cell.row, cell.col);
    if value.is_blank() {
        return true;
    }
    if value.as_number() == Some(0.0) {
        return true;
    }

    tracker.record(
        StageId::ControlTotal,
        format!("control total is {}, expected 0", value.display()),
        None,
    );
    false
}

// ---------------------------------------------------------------------------
// Stage 17: percentage unit cleanup
// ---------------------------------------------------------------------------

pub const RESCALE_MARKER: &str = "rates_rescaled";

/// Source systems store the designated columns as raw percentages; the
/// report wants fractions. Literal numeric values are divided by 100,
/// formula cells skipped unconditionally. A marker on the summary sheet
/// makes the stage a no-op on re-runs so values are never divided twice.
pub fn percent_rescale(
    workbook: &mut Workbook,
    ledger_sheet: &str,
    summary_sheet: &str,
    marker_cell: CellRef,
    percent_cols: &[usize],
    data_start: usize,
) -> usize {
    let marker = workbook
        .sheet(summary_sheet)
        .map(|s| s.get_display(marker_cell.row, marker_cell.col))
        .unwrap_or_default();
    if marker == RESCALE_MARKER {
        info!("percent columns already rescaled; skipping");
        return 0;
    }

    let sheet = workbook.sheet_mut(ledger_sheet);
    let rescaled = rescale_columns(sheet, percent_cols, data_start);

    workbook
        .sheet_mut(summary_sheet)
        .set_value(marker_cell.row, marker_cell.col, RESCALE_MARKER);
    rescaled
}

fn rescale_columns(sheet: &mut Sheet, percent_cols: &[usize], data_start: usize) -> usize {
    let Some(last) = sheet.last_used_row_any() else {
        return 0;
    };

    let mut rescaled = 0;
    for row in data_start..=last.max(data_start) {
        for &field in percent_cols {
            if sheet.is_formula(row, field) || sheet.is_blank(row, field) {
                continue;
            }
            if let Some(n) = sheet.get(row, field).as_number() {
                if sheet.set_number_guarded(row, field, n / 100.0) {
                    rescaled += 1;
                }
            }
        }
    }
    rescaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerforge_store::CellValue;

    fn keyed_row(sheet: &mut Sheet, r: usize, id: &str) {
        sheet.set_value(r, col::CONTRACT_ID, id);
        for c in 1..col::COUNT {
            sheet.set_value(r, c, "x");
        }
    }

    #[test]
    fn sweep_names_the_right_row() {
        let mut sheet = Sheet::new("Ledger");
        keyed_row(&mut sheet, 2, "LR00000001");
        keyed_row(&mut sheet, 3, "LR00000002");
        sheet.set_cell(3, col::EQUIPMENT, CellValue::Empty);

        let mut tracker = ExceptionTracker::new();
        let found = blank_sweep(&sheet, 2, &[], &mut tracker);

        assert_eq!(found, 1);
        let record = &tracker.records()[0];
        assert_eq!(record.contract_id.as_deref(), Some("LR00000002"));
        assert!(record.message.contains("equipment"));
    }

    #[test]
    fn sweep_skips_excluded_columns_and_keyless_rows() {
        let mut sheet = Sheet::new("Ledger");
        keyed_row(&mut sheet, 2, "LR00000001");
        sheet.set_cell(2, col::VALUATION, CellValue::Empty);
        // separator row: blank key, everything blank
        sheet.set_value(4, col::EQUIPMENT, "orphan");

        let mut tracker = ExceptionTracker::new();
        let found = blank_sweep(&sheet, 2, &[col::VALUATION], &mut tracker);

        assert_eq!(found, 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn whitespace_only_counts_as_blank() {
        let mut sheet = Sheet::new("Ledger");
        keyed_row(&mut sheet, 2, "LR00000001");
        sheet.set_cell(2, col::PURPOSE, CellValue::Text("   ".into()));

        let mut tracker = ExceptionTracker::new();
        assert_eq!(blank_sweep(&sheet, 2, &[], &mut tracker), 1);
    }

    #[test]
    fn rate_check_flags_violations_only() {
        let mut sheet = Sheet::new("Ledger");
        sheet.set_value(2, col::CONTRACT_ID, "LR00000001");
        sheet.set_number(2, col::RATE_FLOOR, 5.5);
        sheet.set_value(3, col::CONTRACT_ID, "LR00000002");
        sheet.set_number(3, col::RATE_FLOOR, 9.25);

        let mut tracker = ExceptionTracker::new();
        let found = rate_floor_check(&sheet, 2, 0.06, &mut tracker);

        assert_eq!(found, 1);
        assert_eq!(tracker.records()[0].contract_id.as_deref(), Some("LR00000002"));
    }

    #[test]
    fn control_total_zero_and_blank_pass() {
        let mut summary = Sheet::new("Summary");
        let cell = CellRef { row: 38, col: 2 };
        let mut tracker = ExceptionTracker::new();

        assert!(control_total_check(&summary, cell, &mut tracker));
        summary.set_number(38, 2, 0.0);
        assert!(control_total_check(&summary, cell, &mut tracker));
        assert!(tracker.is_empty());
    }

    #[test]
    fn control_total_mismatch_records_the_value() {
        let mut summary = Sheet::new("Summary");
        summary.set_number(38, 2, 137.0);
        let cell = CellRef { row: 38, col: 2 };
        let mut tracker = ExceptionTracker::new();

        assert!(!control_total_check(&summary, cell, &mut tracker));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.records()[0].message.contains("137"));
    }

    #[test]
    fn rescale_divides_literals_and_skips_formulas() {
        let mut wb = Workbook::new();
        let sheet = wb.sheet_mut("Ledger");
        sheet.set_value(2, col::CONTRACT_ID, "LR00000001");
        sheet.set_number(2, col::LTV_PCT, 80.0);
        sheet.set_value(2, col::WEIGHTED_LTV_PCT, "=V3/2");

        let marker = CellRef { row: 0, col: 25 };
        let cols = [col::LTV_PCT, col::WEIGHTED_LTV_PCT];
        let rescaled = percent_rescale(&mut wb, "Ledger", "Summary", marker, &cols, 2);

        let sheet = wb.sheet("Ledger").unwrap();
        assert_eq!(rescaled, 1);
        assert_eq!(sheet.get(2, col::LTV_PCT).as_number(), Some(0.8));
        assert_eq!(sheet.get_display(2, col::WEIGHTED_LTV_PCT), "=V3/2");
        assert_eq!(wb.sheet("Summary").unwrap().get_display(0, 25), RESCALE_MARKER);
    }

    #[test]
    fn rescale_is_idempotent_via_marker() {
        let mut wb = Workbook::new();
        let sheet = wb.sheet_mut("Ledger");
        sheet.set_value(2, col::CONTRACT_ID, "LR00000001");
        sheet.set_number(2, col::LTV_PCT, 80.0);

        let marker = CellRef { row: 0, col: 25 };
        let cols = [col::LTV_PCT];
        percent_rescale(&mut wb, "Ledger", "Summary", marker, &cols, 2);
        let second = percent_rescale(&mut wb, "Ledger", "Summary", marker, &cols, 2);

        assert_eq!(second, 0);
        assert_eq!(wb.sheet("Ledger").unwrap().get(2, col::LTV_PCT).as_number(), Some(0.8));
    }
}
