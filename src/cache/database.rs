//! Database lifecycle: opening the cache, schema creation, version
//! validation, and corruption recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use turso::{Builder, Connection, Database};

use super::error::{is_corruption_error, CacheError};
use super::schema::{ALL_TABLES, CACHE_VERSION, CREATE_INDEXES};

/// Busy timeout so concurrent readers wait for the writer rather than
/// failing immediately.
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TicketCache {
    pub(crate) db: Arc<Database>,
    pub(crate) db_path: PathBuf,
}

impl TicketCache {
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|_| CacheError::CacheAccessDenied(parent.to_path_buf()))?;
        }

        let db = Arc::new(
            Builder::new_local(&db_path.to_string_lossy())
                .build()
                .await?,
        );
        let conn = db.connect()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        {
            let mut rows = conn.query("PRAGMA journal_mode=WAL", ()).await?;
            rows.next().await?;
        }

        let cache = TicketCache {
            db,
            db_path: db_path.to_path_buf(),
        };

        cache.initialize_schema(&conn).await?;
        cache.validate_version(&conn).await?;

        Ok(cache)
    }

    /// Open the cache, deleting and rebuilding it from scratch if it
    /// appears corrupted rather than merely stale.
    pub async fn open_with_corruption_handling(db_path: &Path) -> Result<Self, CacheError> {
        let existed = db_path.exists();
        let result = Self::open(db_path).await;

        if let Err(error) = &result
            && existed
            && is_corruption_error(error)
        {
            tracing::warn!(path = %db_path.display(), "cache appears corrupted, rebuilding");
            if std::fs::remove_file(db_path).is_ok() {
                return Self::open(db_path).await;
            }
        }

        result
    }

    async fn initialize_schema(&self, conn: &Connection) -> Result<(), CacheError> {
        for stmt in ALL_TABLES {
            conn.execute(stmt, ()).await?;
        }
        for stmt in CREATE_INDEXES {
            conn.execute(stmt, ()).await?;
        }
        Ok(())
    }

    async fn validate_version(&self, conn: &Connection) -> Result<(), CacheError> {
        if let Some(found) = self.get_meta_with(conn, "schema_version").await? {
            if found != CACHE_VERSION {
                return Err(CacheError::CacheVersionMismatch {
                    expected: CACHE_VERSION.to_string(),
                    found,
                });
            }
        } else {
            self.set_meta_with(conn, "schema_version", CACHE_VERSION)
                .await?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn connection(&self) -> Result<Connection, CacheError> {
        let conn = self.db.connect()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.connection().await?;
        self.get_meta_with(&conn, key).await
    }

    async fn get_meta_with(
        &self,
        conn: &Connection,
        key: &str,
    ) -> Result<Option<String>, CacheError> {
        let mut rows = conn
            .query("SELECT value FROM cache_meta WHERE key = ?1", [key])
            .await?;
        match rows.next().await? {
            Some(row) => {
                let value: String =
                    row.get(0)
                        .map_err(|e| CacheError::CacheColumnExtraction {
                            column: "value".to_string(),
                            error: e.to_string(),
                        })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let conn = self.connection().await?;
        self.set_meta_with(&conn, key, value).await
    }

    async fn set_meta_with(
        &self,
        conn: &Connection,
        key: &str,
        value: &str,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?1, ?2)",
            (key, value),
        )
        .await?;
        Ok(())
    }

    /// Staleness per spec §4.2: differing schema version, committed
    /// commit, or log size means the cache must be rebuilt.
    pub async fn is_stale(&self, current_commit: &str, current_log_size: u64) -> Result<bool, CacheError> {
        let schema_version = self.get_meta("schema_version").await?;
        if schema_version.as_deref() != Some(CACHE_VERSION) {
            return Ok(true);
        }
        let committed_commit = self.get_meta("committed_commit").await?;
        if committed_commit.as_deref() != Some(current_commit) {
            return Ok(true);
        }
        let last_log_size = self.get_meta("last_log_size").await?;
        match last_log_size {
            Some(v) => Ok(v.parse::<u64>().unwrap_or(0) != current_log_size),
            None => Ok(true),
        }
    }

    pub async fn truncate_all(&self) -> Result<(), CacheError> {
        let conn = self.connection().await?;
        for table in [
            "tickets",
            "tombstones",
            "ticket_deps",
            "ticket_labels",
            "ticket_meta",
        ] {
            conn.execute(&format!("DELETE FROM {table}"), ()).await?;
        }
        Ok(())
    }

    pub async fn record_rebuilt(
        &self,
        committed_commit: &str,
        log_size: u64,
    ) -> Result<(), CacheError> {
        self.set_meta("schema_version", CACHE_VERSION).await?;
        self.set_meta("committed_commit", committed_commit).await?;
        self.set_meta("last_log_size", &log_size.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = TicketCache::open(&path).await.unwrap();
        assert_eq!(
            cache.get_meta("schema_version").await.unwrap().as_deref(),
            Some(CACHE_VERSION)
        );
    }

    #[tokio::test]
    async fn staleness_detects_log_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = TicketCache::open(&path).await.unwrap();
        cache.record_rebuilt("abc123", 100).await.unwrap();

        assert!(!cache.is_stale("abc123", 100).await.unwrap());
        assert!(cache.is_stale("abc123", 200).await.unwrap());
        assert!(cache.is_stale("def456", 100).await.unwrap());
    }
}
