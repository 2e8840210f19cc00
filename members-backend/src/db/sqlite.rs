//! SQLite-backed record store behind an r2d2 connection pool.
//!
//! Construction never touches the database. The schema is applied by
//! [`Database::ready`], which startup calls once and every operation retries
//! until it has succeeded.

use once_cell::sync::OnceCell;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::ValidationError;

pub type DbConn = PooledConnection<SqliteConnectionManager>;

const MEMORY_URL: &str = ":memory:";
const POOL_SIZE: u32 = 8;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(#[from] r2d2::Error),

    #[error("Store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Store location not accessible: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub struct Database {
    location: String,
    pool: Pool<SqliteConnectionManager>,
    schema: OnceCell<()>,
}

impl Database {
    pub fn new(database_url: &str) -> Self {
        let builder = Pool::builder().connection_timeout(CONNECTION_TIMEOUT);

        let pool = if database_url == MEMORY_URL {
            // Every connection to :memory: is its own database, so the pool
            // holds exactly one and never recycles it.
            builder
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .build_unchecked(SqliteConnectionManager::memory())
        } else {
            let manager = SqliteConnectionManager::file(database_url).with_init(|conn| {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            });
            builder
                .max_size(POOL_SIZE)
                .min_idle(Some(0))
                .build_unchecked(manager)
        };

        Self {
            location: database_url.to_string(),
            pool,
            schema: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Connect and apply the schema if that has not happened yet
    pub fn ready(&self) -> Result<(), StoreError> {
        self.schema.get_or_try_init(|| {
            if self.location != MEMORY_URL {
                if let Some(parent) = Path::new(&self.location).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }
            let conn = self.pool.get()?;
            create_tables(&conn)?;
            Ok::<(), StoreError>(())
        })?;
        Ok(())
    }

    pub fn conn(&self) -> Result<DbConn, StoreError> {
        self.ready()?;
        Ok(self.pool.get()?)
    }
}

fn create_tables(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bookClub (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL CHECK (name <> ''),
            age REAL NOT NULL,
            avatar TEXT NOT NULL CHECK (avatar <> ''),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database_becomes_ready() {
        let db = Database::new(":memory:");
        assert!(db.schema.get().is_none());
        db.ready().expect("ready");
        assert!(db.schema.get().is_some());

        let conn = db.conn().expect("conn");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bookClub", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("members.db");
        let db = Database::new(path.to_str().expect("utf8 path"));

        db.ready().expect("ready");
        assert!(path.exists());
        assert_eq!(db.location(), path.to_str().unwrap());
    }

    #[test]
    fn test_unreachable_location_reports_error_and_retries() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").expect("write blocker");
        let path = blocker.join("members.db");
        let db = Database::new(path.to_str().expect("utf8 path"));

        assert!(db.ready().is_err());
        assert!(db.schema.get().is_none());
        assert!(db.conn().is_err());
    }
}
