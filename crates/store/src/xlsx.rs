// XLSX persistence for the ledger workbook.
//
// Load: calamine (values plus formula sources via worksheet_formula).
// Save: rust_xlsxwriter. Formula cells are re-emitted as formulas so the
// reporting toolchain recalculates them on open.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Formula, Workbook as XlsxWorkbook};

use crate::cell::CellValue;
use crate::error::StoreError;
use crate::sheet::Sheet;
use crate::workbook::Workbook;

pub fn load(path: &Path) -> Result<Workbook, StoreError> {
    let mut source = open_workbook_auto(path).map_err(|e| StoreError::Open(e.to_string()))?;
    let sheet_names = source.sheet_names().to_vec();

    let mut workbook = Workbook::new();

    for sheet_name in &sheet_names {
        let range = source
            .worksheet_range(sheet_name)
            .map_err(|e| StoreError::Open(format!("sheet '{sheet_name}': {e}")))?;

        let mut sheet = Sheet::new(sheet_name);

        // Data may not begin at A1
        let (start_row, start_col) = range.start().unwrap_or((0, 0));

        for (row_idx, row) in range.rows().enumerate() {
            let target_row = start_row as usize + row_idx;
            for (col_idx, cell) in row.iter().enumerate() {
                let target_col = start_col as usize + col_idx;
                match cell {
                    Data::Empty => {}
                    Data::String(s) => {
                        if !s.is_empty() {
                            sheet.set_cell(target_row, target_col, CellValue::Text(s.clone()));
                        }
                    }
                    Data::Float(n) => {
                        sheet.set_cell(target_row, target_col, CellValue::Number(*n));
                    }
                    Data::Int(n) => {
                        sheet.set_cell(target_row, target_col, CellValue::Number(*n as f64));
                    }
                    Data::Bool(b) => {
                        let text = if *b { "TRUE" } else { "FALSE" };
                        sheet.set_cell(target_row, target_col, CellValue::Text(text.into()));
                    }
                    Data::Error(e) => {
                        sheet.set_cell(target_row, target_col, CellValue::Text(format!("#{e:?}")));
                    }
                    Data::DateTime(dt) => {
                        sheet.set_cell(target_row, target_col, CellValue::Number(dt.as_f64()));
                    }
                    Data::DateTimeIso(s) | Data::DurationIso(s) => {
                        sheet.set_cell(target_row, target_col, CellValue::Text(s.clone()));
                    }
                }
            }
        }

        // Formula layer wins over the cached value: the cell must be treated
        // as a formula so pipeline writes refuse to touch it.
        if let Ok(formula_range) = source.worksheet_formula(sheet_name) {
            let (f_start_row, f_start_col) = formula_range.start().unwrap_or((0, 0));
            for (row_idx, row) in formula_range.rows().enumerate() {
                let target_row = f_start_row as usize + row_idx;
                for (col_idx, formula) in row.iter().enumerate() {
                    let target_col = f_start_col as usize + col_idx;
                    if formula.is_empty() {
                        continue;
                    }
                    let source_str = if formula.starts_with('=') {
                        formula.clone()
                    } else {
                        format!("={formula}")
                    };
                    sheet.set_cell(
                        target_row,
                        target_col,
                        CellValue::Formula { source: source_str },
                    );
                }
            }
        }

        workbook.add_sheet(sheet);
    }

    Ok(workbook)
}

pub fn save(workbook: &Workbook, path: &Path) -> Result<(), StoreError> {
    let mut out = XlsxWorkbook::new();

    for sheet in workbook.sheets() {
        let worksheet = out.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        for (&(row, col), cell) in sheet.cells_iter() {
            let (row, col) = (row as u32, col as u16);
            let result = match &cell.value {
                CellValue::Empty => continue,
                CellValue::Text(s) => worksheet.write_string(row, col, s),
                CellValue::Number(n) => worksheet.write_number(row, col, *n),
                CellValue::Formula { source } => {
                    worksheet.write_formula(row, col, Formula::new(source))
                }
            };
            result.map_err(|e| StoreError::Write(e.to_string()))?;
        }
    }

    out.save(path).map_err(|e| StoreError::Write(e.to_string()))
}

/// Write a flat table (header row + data rows) as a one-sheet workbook.
/// Used for the exception report.
pub fn write_table(
    path: &Path,
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<String>],
) -> Result<(), StoreError> {
    let mut out = XlsxWorkbook::new();
    let worksheet = out.add_worksheet();
    worksheet
        .set_name(sheet_name)
        .map_err(|e| StoreError::Write(e.to_string()))?;

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .map_err(|e| StoreError::Write(e.to_string()))?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32 + 1, col_idx as u16, value)
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }
    }

    out.save(path).map_err(|e| StoreError::Write(e.to_string()))
}
