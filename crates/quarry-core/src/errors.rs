//! Error types for the Quarry core library.

use crate::models::ParseDiagnostic;

/// Top-level error enum for the Quarry core library.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    /// A file could not be parsed.  Recorded on the owning `FileRecord`;
    /// never fatal to a whole reindex run.
    #[error("parse error in {path}: {diagnostic}")]
    Parse {
        path: String,
        diagnostic: ParseDiagnostic,
    },

    /// The storage layer failed.  Retryable; the reindex driver retries with
    /// backoff before surfacing it.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested path is not on disk and not in the index.
    #[error("file not found: {0}")]
    FileNotFound(String),
}

pub type QuarryResult<T> = Result<T, QuarryError>;
