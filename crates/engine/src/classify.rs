//! Classification stages: client class, loan type, collateral type.
//!
//! Each cascade mirrors the workbook formulas the reporting team maintains,
//! so the precedence order is load-bearing: contract-specific overrides
//! first, sentinel product rules next, composite lookup last.

use std::collections::{HashMap, HashSet};

use ledgerforge_sources::SourceTable;
use ledgerforge_store::Sheet;
use tracing::debug;

use crate::exceptions::ExceptionTracker;
use crate::join::{build_map, keyed_rows, LookupMap};
use crate::model::{col, StageId, LABEL_DEPOSIT_BACKED, LABEL_MARGIN};
use crate::normalize::normalize;

pub const CLIENT_CORPORATE: &str = "Corporate Client";
pub const CLIENT_NON_CORPORATE: &str = "Non-Corporate";

pub const COLLATERAL_IMMOVABLE: &str = "Immovable Properties";
pub const COLLATERAL_VEHICLES: &str = "Vehicles and Machinery";
pub const COLLATERAL_LISTED: &str = "Shares and Debt Securities-Listed";
pub const COLLATERAL_CASH: &str = "Deposits (Cash-Backed)";
pub const COLLATERAL_GUARANTEE: &str = "Personal and Corporate Guarantees";

// ---------------------------------------------------------------------------
// Client class
// ---------------------------------------------------------------------------

/// Corporate clients carry a `2`-prefixed client code.
pub fn classify_clients(sheet: &mut Sheet, data_start: usize) -> usize {
    let mut classified = 0;
    for keyed in keyed_rows(sheet, data_start) {
        if !sheet.is_blank(keyed.row, col::CLIENT_CLASS) {
            continue;
        }
        let code = sheet.get_display(keyed.row, col::CLIENT_CODE);
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        let label = if code.starts_with('2') {
            CLIENT_CORPORATE
        } else {
            CLIENT_NON_CORPORATE
        };
        if sheet.set_if_blank(keyed.row, col::CLIENT_CLASS, label) {
            classified += 1;
        }
    }
    classified
}

// ---------------------------------------------------------------------------
// Loan type
// ---------------------------------------------------------------------------

/// Lookup tables for the loan-type cascade, built once per stage invocation
/// from the classification master.
pub struct LoanTypeMaps {
    special: LookupMap,
    composite: HashMap<String, String>,
}

impl LoanTypeMaps {
    pub fn from_table(
        table: &SourceTable,
        special_key: usize,
        special_label: usize,
        composite_key: usize,
        composite_label: usize,
        skip_rows: usize,
    ) -> Self {
        let special = build_map(table, special_key, special_label, skip_rows);

        let mut composite = HashMap::new();
        for row in skip_rows..table.num_rows() {
            let key = table.cell(row, composite_key).trim().to_string();
            let label = table.cell(row, composite_label).trim().to_string();
            if key.is_empty() || label.is_empty() {
                continue;
            }
            composite.entry(key).or_insert(label);
        }

        Self { special, composite }
    }
}

/// Contract-specific override → sentinel product rules → composite lookup.
/// Rows no rule covers are logged and left blank.
pub fn classify_loan_types(
    sheet: &mut Sheet,
    data_start: usize,
    maps: &LoanTypeMaps,
    tracker: &mut ExceptionTracker,
) -> usize {
    let mut classified = 0;

    for keyed in keyed_rows(sheet, data_start) {
        if !sheet.is_blank(keyed.row, col::LOAN_TYPE) {
            continue;
        }

        let tag = sheet.get_display(keyed.row, col::CATEGORY_TAG);
        let tag = tag.trim();

        let label = if let Some(special) = maps.special.get(&keyed.norm, &keyed.alias) {
            Some(special.to_string())
        } else if tag.eq_ignore_ascii_case(LABEL_MARGIN) || tag == "MT" {
            Some("Margin Trading Loans".to_string())
        } else if tag.eq_ignore_ascii_case(LABEL_DEPOSIT_BACKED) || tag == "00" {
            Some("Loans against Cash/Deposits".to_string())
        } else {
            let composite = format!(
                "{}{}{}{}",
                tag,
                sheet.get_display(keyed.row, col::EQUIPMENT).trim(),
                sheet.get_display(keyed.row, col::PURPOSE).trim(),
                sheet.get_display(keyed.row, col::CLIENT_CLASS).trim(),
            );
            maps.composite.get(&composite).cloned()
        };

        match label {
            Some(label) => {
                if sheet.set_if_blank(keyed.row, col::LOAN_TYPE, &label) {
                    classified += 1;
                }
            }
            None => {
                tracker.record(
                    StageId::LoanType,
                    "no loan-type rule matched",
                    Some(keyed.norm.as_str()),
                );
            }
        }
    }

    debug!(classified, "loan types assigned");
    classified
}

// ---------------------------------------------------------------------------
// Collateral
// ---------------------------------------------------------------------------

/// Membership sets for the collateral cascade.
pub struct CollateralLists {
    property: HashSet<String>,
    vehicle_categories: HashSet<String>,
}

impl CollateralLists {
    pub fn new(property_list: &SourceTable, property_key: usize, property_skip: usize,
               categories: &SourceTable, vehicle_col: usize, vehicle_skip: usize) -> Self {
        let property = (property_skip..property_list.num_rows())
            .filter_map(|row| normalize(property_list.cell(row, property_key)))
            .collect();

        let vehicle_categories = (vehicle_skip..categories.num_rows())
            .map(|row| categories.cell(row, vehicle_col).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self { property, vehicle_categories }
    }
}

/// Property-list membership → vehicle risk category → product sentinels →
/// guarantee default. Every keyed row ends up classified.
pub fn classify_collateral(sheet: &mut Sheet, data_start: usize, lists: &CollateralLists) -> usize {
    let mut classified = 0;

    for keyed in keyed_rows(sheet, data_start) {
        if !sheet.is_blank(keyed.row, col::COLLATERAL_CLASS) {
            continue;
        }

        let risk = sheet.get_display(keyed.row, col::RISK_CATEGORY);
        let tag = sheet.get_display(keyed.row, col::CATEGORY_TAG);
        let tag = tag.trim();

        let label = if lists.property.contains(&keyed.norm) {
            COLLATERAL_IMMOVABLE
        } else if !risk.trim().is_empty() && lists.vehicle_categories.contains(risk.trim()) {
            COLLATERAL_VEHICLES
        } else if tag.eq_ignore_ascii_case(LABEL_MARGIN) {
            COLLATERAL_LISTED
        } else if tag.eq_ignore_ascii_case(LABEL_DEPOSIT_BACKED) {
            COLLATERAL_CASH
        } else {
            COLLATERAL_GUARANTEE
        };

        if sheet.set_if_blank(keyed.row, col::COLLATERAL_CLASS, label) {
            classified += 1;
        }
    }

    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> SourceTable {
        SourceTable::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn row(sheet: &mut Sheet, r: usize, id: &str, tag: &str) {
        sheet.set_value(r, col::CONTRACT_ID, id);
        sheet.set_value(r, col::CATEGORY_TAG, tag);
    }

    #[test]
    fn corporate_prefix_wins() {
        let mut sheet = Sheet::new("Ledger");
        row(&mut sheet, 2, "LR00000001", "LR");
        sheet.set_value(2, col::CLIENT_CODE, "2044");
        row(&mut sheet, 3, "LR00000002", "LR");
        sheet.set_value(3, col::CLIENT_CODE, "1044");
        row(&mut sheet, 4, "LR00000003", "LR"); // no client code yet

        assert_eq!(classify_clients(&mut sheet, 2), 2);
        assert_eq!(sheet.get_display(2, col::CLIENT_CLASS), CLIENT_CORPORATE);
        assert_eq!(sheet.get_display(3, col::CLIENT_CLASS), CLIENT_NON_CORPORATE);
        assert!(sheet.is_blank(4, col::CLIENT_CLASS));
    }

    #[test]
    fn loan_type_cascade_precedence() {
        let mut sheet = Sheet::new("Ledger");
        row(&mut sheet, 2, "LR00000001", "LR"); // special override
        row(&mut sheet, 3, "MT00000002", "Margin Trading");
        row(&mut sheet, 4, "0000000003", "FD Loan");
        row(&mut sheet, 5, "LR00000004", "LR"); // composite
        sheet.set_value(5, col::EQUIPMENT, "Lorry");
        sheet.set_value(5, col::PURPOSE, "Transport");
        sheet.set_value(5, col::CLIENT_CLASS, CLIENT_NON_CORPORATE);
        row(&mut sheet, 6, "LR00000005", "LR"); // nothing matches

        let master = table(&[
            &["", "", "", "", "Classification", "LOOKUP"],
            &["", "", "", "", "Commercial Vehicle Loans", "LRLorryTransportNon-Corporate"],
        ]);
        let mut maps = LoanTypeMaps::from_table(&master, 11, 12, 5, 4, 1);
        maps.special.insert("LR00000001", "Staff Vehicle Loans");

        let mut tracker = ExceptionTracker::new();
        let classified = classify_loan_types(&mut sheet, 2, &maps, &mut tracker);

        assert_eq!(classified, 4);
        assert_eq!(sheet.get_display(2, col::LOAN_TYPE), "Staff Vehicle Loans");
        assert_eq!(sheet.get_display(3, col::LOAN_TYPE), "Margin Trading Loans");
        assert_eq!(sheet.get_display(4, col::LOAN_TYPE), "Loans against Cash/Deposits");
        assert_eq!(sheet.get_display(5, col::LOAN_TYPE), "Commercial Vehicle Loans");
        assert!(sheet.is_blank(6, col::LOAN_TYPE));
        assert_eq!(tracker.count_for(StageId::LoanType), 1);
    }

    #[test]
    fn collateral_cascade_precedence() {
        let mut sheet = Sheet::new("Ledger");
        row(&mut sheet, 2, "LR00000001", "LR"); // in property list
        row(&mut sheet, 3, "LR00000002", "LR"); // vehicle risk category
        sheet.set_value(3, col::RISK_CATEGORY, "Agricultural Machinery");
        row(&mut sheet, 4, "MT00000003", "Margin Trading");
        row(&mut sheet, 5, "0000000004", "FD Loan");
        row(&mut sheet, 6, "LR00000005", "LR"); // default

        let property = table(&[&["CONTRACT"], &["LR00000001"]]);
        let categories = table(&[&["header"], &["Agricultural Machinery"]]);
        let lists = CollateralLists::new(&property, 0, 1, &categories, 0, 1);

        classify_collateral(&mut sheet, 2, &lists);

        assert_eq!(sheet.get_display(2, col::COLLATERAL_CLASS), COLLATERAL_IMMOVABLE);
        assert_eq!(sheet.get_display(3, col::COLLATERAL_CLASS), COLLATERAL_VEHICLES);
        assert_eq!(sheet.get_display(4, col::COLLATERAL_CLASS), COLLATERAL_LISTED);
        assert_eq!(sheet.get_display(5, col::COLLATERAL_CLASS), COLLATERAL_CASH);
        assert_eq!(sheet.get_display(6, col::COLLATERAL_CLASS), COLLATERAL_GUARANTEE);
    }
}
