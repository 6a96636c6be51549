use std::fmt;
use thiserror::Error;

/// Failure of a single sink during a write or read-back.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFailure {
    pub sink: String,
    pub reason: String,
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sink, self.reason)
    }
}

pub const EXIT_MALFORMED_INPUT: u8 = 2;
pub const EXIT_CORRUPT_STORE: u8 = 3;
pub const EXIT_PARTIAL_PERSISTENCE: u8 = 4;
pub const EXIT_INVALID_CONFIG: u8 = 64;

fn summarize(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the ledger.
///
/// `MalformedInput` is recoverable at the file level: the pipeline skips the
/// file and keeps going. `CorruptStore` and `PartialPersistence` abort the run.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("malformed input in {file}: {reason}")]
    MalformedInput { file: String, reason: String },

    #[error("persisted store '{sink}' cannot be decoded: {reason}")]
    CorruptStore { sink: String, reason: String },

    #[error("partial persistence, {} sink(s) failed: {}", .failures.len(), summarize(.failures))]
    PartialPersistence { failures: Vec<SinkFailure> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn malformed(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MalformedInput { .. } => EXIT_MALFORMED_INPUT,
            Self::CorruptStore { .. } => EXIT_CORRUPT_STORE,
            Self::PartialPersistence { .. } => EXIT_PARTIAL_PERSISTENCE,
            Self::InvalidConfig(_) => EXIT_INVALID_CONFIG,
            Self::Io(_) => 1,
        }
    }
}

/// Codec-level error raised by an individual sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("schema mismatch: {0}")]
    Schema(String),
}

impl From<tempfile::PersistError> for SinkError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}
