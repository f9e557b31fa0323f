use std::fmt;

#[derive(Debug)]
pub enum SourceError {
    /// File could not be read.
    Io(String),
    /// CSV parse error.
    Csv(String),
    /// Excel parse error.
    Excel(String),
    /// A referenced sheet does not exist.
    UnknownSheet(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::Excel(msg) => write!(f, "Excel error: {msg}"),
            Self::UnknownSheet(name) => write!(f, "unknown sheet: {name}"),
        }
    }
}

impl std::error::Error for SourceError {}
