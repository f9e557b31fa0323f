// Excel source import (xlsx, xls, xlsb) via calamine. One-way, bulk read.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::SourceError;
use crate::table::SourceTable;

/// Import one sheet of an Excel file. `sheet` of `None` takes the first sheet.
pub fn import(path: &Path, sheet: Option<&str>) -> Result<SourceTable, SourceError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| SourceError::Excel(e.to_string()))?;

    let names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet {
        Some(name) => names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| SourceError::UnknownSheet(name.to_string()))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| SourceError::Excel("workbook has no sheets".into()))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| SourceError::Excel(format!("sheet '{sheet_name}': {e}")))?;

    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(range.height() + start_row as usize);

    // Pad to absolute coordinates so column letters in the run config line up
    // with what the analyst sees in the original file.
    for _ in 0..start_row {
        rows.push(Vec::new());
    }

    for row in range.rows() {
        let mut out = vec![String::new(); start_col as usize];
        for cell in row {
            out.push(render(cell));
        }
        rows.push(out);
    }

    Ok(SourceTable::from_rows(rows))
}

/// Numeric cells render without a trailing `.0` so numeric contract ids
/// survive key normalization.
fn render(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => format!("{n}"),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::Error(e) => format!("#{e:?}"),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}
