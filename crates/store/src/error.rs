use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// Workbook file could not be opened or parsed.
    Open(String),
    /// A referenced sheet does not exist in the workbook.
    UnknownSheet(String),
    /// Workbook could not be written.
    Write(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(msg) => write!(f, "cannot open workbook: {msg}"),
            Self::UnknownSheet(name) => write!(f, "unknown sheet: {name}"),
            Self::Write(msg) => write!(f, "cannot write workbook: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
