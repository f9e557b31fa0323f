use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (missing source, bad cell ref, etc.).
    ConfigValidation(String),
    /// Ledger store could not be acquired. The only fatal category.
    StoreAcquire(String),
    /// A stage body failed; recorded and the run continues.
    Stage(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::StoreAcquire(msg) => write!(f, "cannot acquire ledger store: {msg}"),
            Self::Stage(msg) => write!(f, "stage error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
