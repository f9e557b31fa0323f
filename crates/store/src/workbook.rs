use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::sheet::Sheet;

/// A workbook of named sheets. Sheet names are matched case-insensitively
/// because the surrounding toolchain is not consistent about casing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    /// Get-or-create by name.
    pub fn sheet_mut(&mut self, name: &str) -> &mut Sheet {
        if let Some(idx) = self.position(name) {
            return &mut self.sheets[idx];
        }
        self.sheets.push(Sheet::new(name));
        self.sheets.last_mut().unwrap()
    }

    pub fn sheet(&self, name: &str) -> Result<&Sheet, StoreError> {
        self.position(name)
            .map(|idx| &self.sheets[idx])
            .ok_or_else(|| StoreError::UnknownSheet(name.to_string()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }
}
