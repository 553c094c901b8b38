use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Malformed migration {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("History conflict: {0}")]
    HistoryConflict(String),

    #[error(
        "Checksum mismatch for applied migration {version} ({name}): ledger has {recorded}, file has {found}; \
         applied migrations must not be edited, add a new migration instead"
    )]
    ChecksumMismatch {
        version: i64,
        name: String,
        recorded: String,
        found: String,
    },

    #[error("Migration {version} ({name}) failed: {source}")]
    Execution {
        version: i64,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ledger table name {0:?}: expected [schema.]table using letters, digits and underscores")]
    InvalidLedgerTable(String),
}

impl MigrateError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable short name used in operator-facing output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed-migration",
            Self::HistoryConflict(_) => "history-conflict",
            Self::ChecksumMismatch { .. } => "checksum-mismatch",
            Self::Execution { .. } => "execution",
            Self::Ledger(_) | Self::Io { .. } => "ledger",
            Self::InvalidLedgerTable(_) => "config",
        }
    }

    /// Version of the migration the error is about, if any.
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::ChecksumMismatch { version, .. } | Self::Execution { version, .. } => Some(*version),
            _ => None,
        }
    }
}
