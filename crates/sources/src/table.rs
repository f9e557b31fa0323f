/// A fully-materialized external table. Ragged rows are allowed; out-of-range
/// access reads as an empty cell.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    rows: Vec<Vec<String>>,
    cols: usize,
}

impl SourceTable {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        Self { rows, cols }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn rows(&self) -> impl Iterator<Item = &Vec<String>> {
        self.rows.iter()
    }

    /// All non-empty values of one column, top to bottom.
    pub fn column(&self, col: usize) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|r| r.get(col))
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
            .collect()
    }
}
