//! Relocation of the two special product classes to the bottom of the
//! ledger, bulk-read-then-bulk-write.
//!
//! Downstream reporting groups these classes below the main block. Doing
//! this as one read, one clear, and one rewrite avoids the row-shift bugs
//! that incremental in-place inserts produce: nothing is cleared until
//! every matching row has been copied out. Apart from the tag remap the
//! relocated rows are carried over untouched.

use ledgerforge_store::{CellValue, Sheet};
use tracing::info;

use crate::model::{col, LABEL_DEPOSIT_BACKED, LABEL_MARGIN, SENTINEL_DEPOSIT_BACKED, SENTINEL_MARGIN};

#[derive(Debug, Default)]
pub struct ReclassifyStats {
    pub relocated: usize,
}

pub fn relocate_special_rows(sheet: &mut Sheet, data_start: usize) -> ReclassifyStats {
    let Some(last) = sheet.last_used_row_any() else {
        return ReclassifyStats::default();
    };
    if last < data_start {
        return ReclassifyStats::default();
    }

    let block = sheet.read_range(data_start, 0, last, col::COUNT - 1);

    let mut normal: Vec<Vec<CellValue>> = Vec::new();
    let mut special: Vec<Vec<CellValue>> = Vec::new();

    for mut row in block {
        if row.iter().all(|c| c.is_blank()) {
            continue;
        }
        match canonical_label(&row[col::CATEGORY_TAG].display()) {
            Some(label) => {
                row[col::CATEGORY_TAG] = CellValue::Text(label.to_string());
                special.push(row);
            }
            None => normal.push(row),
        }
    }

    if special.is_empty() {
        return ReclassifyStats::default();
    }

    let relocated = special.len();
    sheet.clear_range(data_start, 0, last, col::COUNT - 1);

    let mut row = data_start;
    for values in &normal {
        sheet.write_row(row, 0, values);
        row += 1;
    }
    row += 1; // exactly one blank separator row
    for values in &special {
        sheet.write_row(row, 0, values);
        row += 1;
    }

    info!(relocated, "special product rows moved below the main block");
    ReclassifyStats { relocated }
}

fn canonical_label(tag: &str) -> Option<&'static str> {
    let tag = tag.trim();
    if tag == SENTINEL_DEPOSIT_BACKED || tag.eq_ignore_ascii_case(LABEL_DEPOSIT_BACKED) {
        Some(LABEL_DEPOSIT_BACKED)
    } else if tag == SENTINEL_MARGIN || tag.eq_ignore_ascii_case(LABEL_MARGIN) {
        Some(LABEL_MARGIN)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_sheet() -> Sheet {
        let mut sheet = Sheet::new("Ledger");
        let rows = [
            ("LR00000001", "LR", "2001", 14.0, 50_000.0),
            ("0000000002", "00", "1002", 12.0, 80_000.0),
            ("AT00000003", "AT", "1003", 11.0, 60_000.0),
            ("MT00000004", "MT", "2004", 9.5, 30_000.0),
        ];
        for (i, (id, tag, client, rate, amount)) in rows.iter().enumerate() {
            let row = 2 + i;
            sheet.set_cell(row, col::CONTRACT_ID, CellValue::Text(id.to_string()));
            sheet.set_cell(row, col::CATEGORY_TAG, CellValue::Text(tag.to_string()));
            sheet.set_value(row, col::CLIENT_CODE, client);
            sheet.set_number(row, col::BASE_RATE, *rate);
            sheet.set_number(row, col::DISBURSED_AMOUNT, *amount);
        }
        sheet
    }

    fn non_blank_rows(sheet: &Sheet, data_start: usize) -> Vec<usize> {
        let last = sheet.last_used_row_any().unwrap();
        (data_start..=last)
            .filter(|&r| (0..col::COUNT).any(|c| !sheet.is_blank(r, c)))
            .collect()
    }

    #[test]
    fn relocates_with_single_blank_separator() {
        let mut sheet = seeded_sheet();
        let before = non_blank_rows(&sheet, 2).len();

        let stats = relocate_special_rows(&mut sheet, 2);
        assert_eq!(stats.relocated, 2);

        // Row count preserved
        assert_eq!(non_blank_rows(&sheet, 2).len(), before);

        // Main block is compact: rows 2..3, separator at 4, specials at 5..6
        assert_eq!(sheet.get_display(2, col::CONTRACT_ID), "LR00000001");
        assert_eq!(sheet.get_display(3, col::CONTRACT_ID), "AT00000003");
        assert!((0..col::COUNT).all(|c| sheet.is_blank(4, c)));
        assert_eq!(sheet.get_display(5, col::CONTRACT_ID), "0000000002");
        assert_eq!(sheet.get_display(5, col::CATEGORY_TAG), "FD Loan");
        assert_eq!(sheet.get_display(6, col::CONTRACT_ID), "MT00000004");
        assert_eq!(sheet.get_display(6, col::CATEGORY_TAG), "Margin Trading");
    }

    #[test]
    fn relocated_rows_are_identical_apart_from_the_tag() {
        let mut sheet = seeded_sheet();
        let original = sheet.read_range(3, 0, 3, col::COUNT - 1).remove(0);

        relocate_special_rows(&mut sheet, 2);

        let relocated = sheet.read_range(5, 0, 5, col::COUNT - 1).remove(0);
        for field in 0..col::COUNT {
            if field == col::CATEGORY_TAG {
                assert_eq!(relocated[field], CellValue::Text("FD Loan".into()));
            } else {
                assert_eq!(relocated[field], original[field], "field {}", col::name(field));
            }
        }
    }

    #[test]
    fn no_special_rows_is_a_no_op() {
        let mut sheet = Sheet::new("Ledger");
        sheet.set_value(2, col::CONTRACT_ID, "LR00000001");
        sheet.set_value(2, col::CATEGORY_TAG, "TL");
        let stats = relocate_special_rows(&mut sheet, 2);
        assert_eq!(stats.relocated, 0);
        assert_eq!(sheet.get_display(2, col::CONTRACT_ID), "LR00000001");
    }

    #[test]
    fn relocation_is_stable_on_rerun() {
        let mut sheet = seeded_sheet();
        relocate_special_rows(&mut sheet, 2);
        let snapshot = sheet.read_range(2, 0, sheet.last_used_row_any().unwrap(), col::COUNT - 1);

        // The canonical labels still match, so a second pass rebuilds the
        // same arrangement.
        relocate_special_rows(&mut sheet, 2);
        let again = sheet.read_range(2, 0, sheet.last_used_row_any().unwrap(), col::COUNT - 1);
        assert_eq!(snapshot, again);
    }
}
