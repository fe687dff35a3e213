//! The ticket cache: a rebuildable SQLite index over the plan log,
//! kept fresh by comparing `(schema_version, committed_commit,
//! last_log_size)` against what produced it.

pub mod database;
pub mod error;
pub mod queries;
pub mod schema;
pub mod sync;

pub use database::TicketCache;
pub use error::{is_corruption_error, CacheError};
pub use queries::SimpleFilter;

use std::path::Path;

use crate::error::Result;

/// Open the cache at `db_path`, rebuilding it from `log_path` if it is
/// missing, corrupted, or stale relative to `committed_commit`.
pub async fn open_and_refresh(
    db_path: &Path,
    log_path: &Path,
    committed_commit: &str,
    now: i64,
) -> Result<TicketCache> {
    let cache = TicketCache::open_with_corruption_handling(db_path).await?;
    let current_log_size = crate::log::log_size(log_path)?;

    if cache.is_stale(committed_commit, current_log_size).await? {
        sync::rebuild(&cache, log_path, committed_commit, now).await?;
    }

    Ok(cache)
}
