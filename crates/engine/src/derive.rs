//! Derived metrics: rate floor, tenure, effective rate, annual interest
//! cost, loan-to-value and its exposure-weighted variant.
//!
//! Derivations only fill blank cells, so values pinned earlier (the
//! reclassifier sets the special rows' rates from the base rate) and
//! analyst-entered formulas are left alone.

use std::collections::HashMap;

use ledgerforge_store::Sheet;

use crate::classify::COLLATERAL_VEHICLES;
use crate::join::keyed_rows;
use crate::model::col;

fn number(sheet: &Sheet, row: usize, field: usize) -> Option<f64> {
    sheet.get(row, field).as_number()
}

fn set_if_blank_number(sheet: &mut Sheet, row: usize, field: usize, value: f64) -> bool {
    if !sheet.is_blank(row, field) {
        return false;
    }
    sheet.set_number_guarded(row, field, value)
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Stage 6: rate floor, tenure, effective rate
// ---------------------------------------------------------------------------

pub fn derive_rate_terms(sheet: &mut Sheet, data_start: usize) -> usize {
    let mut filled = 0;

    for keyed in keyed_rows(sheet, data_start) {
        let row = keyed.row;

        // Floor = lower of contractual and base rate; one-sided when only
        // one is available.
        let floor = match (
            number(sheet, row, col::CONTRACT_RATE),
            number(sheet, row, col::BASE_RATE),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        if let Some(floor) = floor {
            if set_if_blank_number(sheet, row, col::RATE_FLOOR, floor) {
                filled += 1;
            }
        }

        // Tenure in months depends on the rental frequency unit.
        let period = number(sheet, row, col::PERIOD);
        let frequency = sheet.get_display(row, col::FREQUENCY);
        let tenure = period.map(|p| match frequency.trim().to_ascii_uppercase().as_str() {
            "D" => p / 30.0,
            "W" => p / 4.0,
            "Q" => p * 3.0,
            _ => p, // monthly is the house default
        });
        if let Some(tenure) = tenure {
            if set_if_blank_number(sheet, row, col::TENURE_MONTHS, tenure) {
                filled += 1;
            }
        }

        // Effective annualized rate from the floor, compounding at the
        // contract's repricing interval.
        let floor = number(sheet, row, col::RATE_FLOOR);
        let tenure = number(sheet, row, col::TENURE_MONTHS);
        if let (Some(floor), Some(tenure)) = (floor, tenure) {
            if tenure > 0.0 {
                let periods_per_year = 12.0 / tenure;
                let effective =
                    ((1.0 + floor / 100.0 / periods_per_year).powf(periods_per_year) - 1.0) * 100.0;
                if set_if_blank_number(sheet, row, col::EFFECTIVE_RATE, round2(effective)) {
                    filled += 1;
                }
            }
        }
    }

    filled
}

// ---------------------------------------------------------------------------
// Stage 13: exposure fallback, LTV, weighted LTV, annual cost
// ---------------------------------------------------------------------------

pub fn derive_loan_metrics(sheet: &mut Sheet, data_start: usize) -> usize {
    let mut filled = 0;
    let rows = keyed_rows(sheet, data_start);

    // Exposure falls back to the contract amount when the working table had
    // no entry for the row.
    for keyed in &rows {
        if sheet.is_blank(keyed.row, col::GROSS_EXPOSURE) {
            if let Some(amount) = number(sheet, keyed.row, col::CONTRACT_AMOUNT) {
                if set_if_blank_number(sheet, keyed.row, col::GROSS_EXPOSURE, amount) {
                    filled += 1;
                }
            }
        }
    }

    // LTV is only meaningful for vehicle collateral; everything else reads 0.
    for keyed in &rows {
        let row = keyed.row;
        if !sheet.is_blank(row, col::LTV_PCT) {
            continue;
        }
        let is_vehicle =
            sheet.get_display(row, col::COLLATERAL_CLASS).trim() == COLLATERAL_VEHICLES;
        let ltv = if is_vehicle {
            match (
                number(sheet, row, col::CONTRACT_AMOUNT),
                number(sheet, row, col::VALUATION),
            ) {
                (Some(amount), Some(valuation)) if valuation != 0.0 => {
                    round2(amount / valuation * 100.0)
                }
                _ => 0.0,
            }
        } else {
            0.0
        };
        if set_if_blank_number(sheet, row, col::LTV_PCT, ltv) {
            filled += 1;
        }
    }

    // Weighted LTV: exposure share within the collateral class times LTV.
    let mut exposure_by_class: HashMap<String, f64> = HashMap::new();
    for keyed in &rows {
        let class = sheet.get_display(keyed.row, col::COLLATERAL_CLASS).trim().to_string();
        if class.is_empty() {
            continue;
        }
        let exposure = number(sheet, keyed.row, col::GROSS_EXPOSURE).unwrap_or(0.0);
        *exposure_by_class.entry(class).or_insert(0.0) += exposure;
    }

    for keyed in &rows {
        let row = keyed.row;
        if !sheet.is_blank(row, col::WEIGHTED_LTV_PCT) {
            continue;
        }
        let class = sheet.get_display(row, col::COLLATERAL_CLASS).trim().to_string();
        let weighted = if class == COLLATERAL_VEHICLES {
            let total = exposure_by_class.get(&class).copied().unwrap_or(0.0);
            let exposure = number(sheet, row, col::GROSS_EXPOSURE).unwrap_or(0.0);
            let ltv = number(sheet, row, col::LTV_PCT).unwrap_or(0.0);
            if total > 0.0 {
                round2(exposure / total * ltv)
            } else {
                0.0
            }
        } else {
            0.0
        };
        if set_if_blank_number(sheet, row, col::WEIGHTED_LTV_PCT, weighted) {
            filled += 1;
        }
    }

    // Annual interest cost from the effective rate.
    for keyed in &rows {
        let row = keyed.row;
        if let (Some(amount), Some(effective)) = (
            number(sheet, row, col::CONTRACT_AMOUNT),
            number(sheet, row, col::EFFECTIVE_RATE),
        ) {
            let cost = (amount * effective / 100.0).round();
            if set_if_blank_number(sheet, row, col::ANNUAL_COST, cost) {
                filled += 1;
            }
        }
    }

    filled
}
