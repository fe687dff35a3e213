//! Cache-lifecycle errors, wrapped into `RalphError::Cache` at the
//! boundary the rest of the engine sees.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot access cache directory at {0}")]
    CacheAccessDenied(PathBuf),

    #[error("cache schema mismatch: expected version {expected}, found {found}")]
    CacheVersionMismatch { expected: String, found: String },

    #[error("failed to open cache at {0}: {1}")]
    CacheAccessFailed(PathBuf, String),

    #[error("cache data integrity error: {0}")]
    CacheDataIntegrity(String),

    #[error("cache is not available")]
    CacheNotAvailable,

    #[error("failed to extract column '{column}': {error}")]
    CacheColumnExtraction { column: String, error: String },

    #[error("database error: {0}")]
    Turso(#[from] turso::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Heuristic used by `open_with_corruption_handling`: does this error
/// look like on-disk corruption rather than a transient/config issue?
pub fn is_corruption_error(err: &CacheError) -> bool {
    match err {
        CacheError::CacheDataIntegrity(_) => true,
        CacheError::Turso(e) => {
            let msg = e.to_string().to_lowercase();
            msg.contains("malformed") || msg.contains("corrupt") || msg.contains("not a database")
        }
        _ => false,
    }
}
