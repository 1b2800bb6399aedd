//! `SQLite` connection pool and the scoped connection resource.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` backend.
//! The [`PragmaCustomizer`] runs on each new connection to apply WAL
//! mode, foreign keys, the busy timeout, and cache sizing.
//!
//! [`ScopedConnection`] wraps one pooled connection (plus optional
//! explicit transaction) for the lifetime of a unit of work; it is the
//! concrete resource managed by [`crate::sql::scope`].

use std::cell::{Cell, RefCell};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::errors::{PersistenceError, Result};
use crate::sql::scope::ScopedRelease;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// `SQLite` pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    cache_size_kib: i64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA cache_size = -{};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms, self.cache_size_kib
        ))?;
        Ok(())
    }
}

/// Build a connection pool for the given configuration.
///
/// With no path configured this opens a private named in-memory database
/// shared (via `cache=shared`) by every connection in the pool, so all
/// pool members see one store.
pub fn build_pool(config: &StoreConfig) -> Result<ConnectionPool> {
    let manager = match &config.path {
        Some(path) => SqliteConnectionManager::file(path),
        None => SqliteConnectionManager::file(format!(
            "file:strata-{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        ))
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        ),
    };
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
            cache_size_kib: config.cache_size_kib,
        }))
        .build(manager)?;
    Ok(pool)
}

/// One pooled connection plus optional explicit transaction, shared by
/// nested operations inside a single unit of work.
///
/// Released exactly once by the root scope owner; any use after release
/// fails with [`PersistenceError::ConnectionReleased`].
pub struct ScopedConnection {
    conn: RefCell<Option<PooledConnection>>,
    in_transaction: Cell<bool>,
}

impl ScopedConnection {
    /// Wrap a pooled connection for scoped sharing.
    pub fn new(conn: PooledConnection) -> Self {
        Self {
            conn: RefCell::new(Some(conn)),
            in_transaction: Cell::new(false),
        }
    }

    /// Run `f` against the underlying connection.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.borrow();
        let conn = guard.as_ref().ok_or(PersistenceError::ConnectionReleased)?;
        f(conn)
    }

    /// Begin an immediate (write-reserving) transaction.
    pub fn begin(&self) -> Result<()> {
        self.with(|conn| {
            let _ = conn.execute("BEGIN IMMEDIATE", [])?;
            Ok(())
        })?;
        self.in_transaction.set(true);
        Ok(())
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.with(|conn| {
            let _ = conn.execute("COMMIT", [])?;
            Ok(())
        })?;
        self.in_transaction.set(false);
        Ok(())
    }

    /// Roll back the open transaction.
    pub fn rollback(&self) -> Result<()> {
        self.with(|conn| {
            let _ = conn.execute("ROLLBACK", [])?;
            Ok(())
        })?;
        self.in_transaction.set(false);
        Ok(())
    }

    /// Whether the root owner has already released this connection.
    pub fn is_released(&self) -> bool {
        self.conn.borrow().is_none()
    }
}

impl ScopedRelease for ScopedConnection {
    fn release(&self) {
        if self.in_transaction.get() {
            // Abandoned unit of work: roll back before the connection
            // returns to the pool.
            let _ = self.rollback();
        }
        debug!("releasing scoped connection");
        drop(self.conn.borrow_mut().take());
    }
}

/// Verify pragmas are set correctly on a connection.
#[cfg(test)]
fn verify_pragmas(conn: &Connection) -> (String, bool) {
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    let foreign_keys: i32 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .unwrap();
    (journal_mode, foreign_keys == 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn in_memory_pool_applies_pragmas() {
        let pool = build_pool(&StoreConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        let (journal_mode, foreign_keys) = verify_pragmas(&conn);
        assert!(
            journal_mode == "wal" || journal_mode == "memory",
            "journal_mode should be wal or memory, got: {journal_mode}"
        );
        assert!(foreign_keys);
    }

    #[test]
    fn file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::file(dir.path().join("test.db"));
        let pool = build_pool(&config).unwrap();
        let conn = pool.get().unwrap();
        let (journal_mode, _) = verify_pragmas(&conn);
        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn pool_connections_share_one_in_memory_database() {
        let config = StoreConfig::in_memory().with_pool_size(2);
        let pool = build_pool(&config).unwrap();
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        a.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();
        let n: i64 = b.query_row("SELECT n FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn use_after_release_fails() {
        let pool = build_pool(&StoreConfig::default()).unwrap();
        let scoped = ScopedConnection::new(pool.get().unwrap());
        scoped.release();
        assert!(scoped.is_released());
        let result = scoped.with(|_| Ok(()));
        assert_matches!(result, Err(PersistenceError::ConnectionReleased));
    }

    #[test]
    fn release_rolls_back_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::file(dir.path().join("test.db"));
        let pool = build_pool(&config).unwrap();

        let scoped = ScopedConnection::new(pool.get().unwrap());
        scoped
            .with(|conn| {
                conn.execute_batch("CREATE TABLE t (n INTEGER)")?;
                Ok(())
            })
            .unwrap();
        scoped.begin().unwrap();
        scoped
            .with(|conn| {
                let _ = conn.execute("INSERT INTO t VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();
        scoped.release();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn double_release_is_safe() {
        let pool = build_pool(&StoreConfig::default()).unwrap();
        let scoped = ScopedConnection::new(pool.get().unwrap());
        scoped.release();
        scoped.release();
        assert!(scoped.is_released());
    }
}
