use std::fmt::{self, Display};
use std::io;

/// Provides `TbError` and maps to other errors to
/// convert to a `TbError`
///
/// `ConfigurationError`, `DataFormatError` and `InvariantViolation` are fatal: the runner stops
/// before any output for the run is written. `LookupError` is recoverable and is consumed by the
/// demographic updater, which skips the affected agent for the current pass.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum TbError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    ConfigurationError(String),
    DataFormatError(String),
    LookupError(String),
    InvariantViolation(String),
    ReportError(String),
}

impl TbError {
    /// Whether the error must abort the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TbError::LookupError(_))
    }
}

impl From<io::Error> for TbError {
    fn from(error: io::Error) -> Self {
        TbError::IoError(error)
    }
}

impl From<serde_json::Error> for TbError {
    fn from(error: serde_json::Error) -> Self {
        TbError::JsonError(error)
    }
}

impl From<csv::Error> for TbError {
    fn from(error: csv::Error) -> Self {
        TbError::CsvError(error)
    }
}

impl From<String> for TbError {
    fn from(error: String) -> Self {
        TbError::ConfigurationError(error)
    }
}

impl From<&str> for TbError {
    fn from(error: &str) -> Self {
        TbError::ConfigurationError(error.to_string())
    }
}

impl std::error::Error for TbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TbError::IoError(error) => Some(error),
            TbError::JsonError(error) => Some(error),
            TbError::CsvError(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for TbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TbError::IoError(error) => write!(f, "I/O error: {error}"),
            TbError::JsonError(error) => write!(f, "JSON error: {error}"),
            TbError::CsvError(error) => write!(f, "CSV error: {error}"),
            TbError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            TbError::DataFormatError(msg) => write!(f, "Data format error: {msg}"),
            TbError::LookupError(msg) => write!(f, "Lookup error: {msg}"),
            TbError::InvariantViolation(msg) => write!(f, "Invariant violation: {msg}"),
            TbError::ReportError(msg) => write!(f, "Report error: {msg}"),
        }
    }
}
