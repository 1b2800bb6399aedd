//! Commit protocol over a SQL dialect.
//!
//! [`SqlPersistenceEngine`] owns the connection pool and the dialect,
//! and implements the append/replay protocol:
//!
//! - `commit` inserts one commit row inside an immediate transaction
//!   and relies on the table's unique constraints for optimistic
//!   concurrency; a tripped constraint is refined into either
//!   [`PersistenceError::DuplicateCommit`] (same commit id already
//!   stored, idempotent retry) or
//!   [`PersistenceError::ConcurrencyConflict`] (another writer advanced
//!   the stream first).
//! - `read_stream` / `read_from_checkpoint` replay commits lazily in
//!   commit-sequence and checkpoint order respectively.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::types::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::dialect::SqlDialect;
use crate::errors::{PersistenceError, Result};
use crate::sql::{
    ConnectionPool, PagedCursor, RowMapper, ScopeHandle, ScopedConnection, SqlStatement,
    UnitOfWork,
};
use crate::types::{Commit, CommitAttempt, EventMessage};

/// Scope key under which engine operations share one connection.
const CONNECTION_SCOPE: &str = "commits-connection";

/// Append and replay engine over a pooled SQL backend.
#[derive(Clone)]
pub struct SqlPersistenceEngine {
    dialect: Arc<dyn SqlDialect>,
    pool: ConnectionPool,
    page_size: usize,
}

impl SqlPersistenceEngine {
    /// Build an engine over an already-constructed pool.
    pub fn new(dialect: Arc<dyn SqlDialect>, pool: ConnectionPool, config: &StoreConfig) -> Self {
        Self {
            dialect,
            pool,
            page_size: config.page_size,
        }
    }

    /// Create the commit schema. Idempotent; index creation is
    /// best-effort and never fails initialization.
    pub fn initialize(&self) -> Result<()> {
        let uow = UnitOfWork::new();
        let handle = self.acquire(&uow)?;
        let stmt = self.statement(handle.share());
        let _ = stmt
            .execute_non_query(self.dialect.initialize_storage())
            .map_err(|error| PersistenceError::Storage {
                message: format!("schema initialization failed: {error}"),
            })?;
        let _ = stmt.execute_ignoring_errors(self.dialect.initialize_indexes());
        info!("commit storage initialized");
        Ok(())
    }

    /// Append one commit, or report why the stream rejected it.
    pub fn commit(&self, attempt: &CommitAttempt) -> Result<Commit> {
        let uow = UnitOfWork::new();
        let handle = self.acquire(&uow)?;
        handle.begin()?;

        let committed_at = Utc::now();
        let mut stmt = self.statement(handle.share());
        stmt.add_parameter(":bucket_id", Value::Text(attempt.bucket_id.clone()));
        stmt.add_parameter(":stream_id", Value::Text(attempt.stream_id.clone()));
        stmt.add_parameter(":commit_id", Value::Text(attempt.commit_id.to_string()));
        stmt.add_parameter(":commit_sequence", Value::Integer(attempt.commit_sequence));
        stmt.add_parameter(":stream_revision", Value::Integer(attempt.stream_revision));
        stmt.add_parameter(
            ":items",
            Value::Integer(i64::try_from(attempt.events.len()).unwrap_or(i64::MAX)),
        );
        stmt.add_parameter(":committed_at", Value::Text(committed_at.to_rfc3339()));
        stmt.add_parameter(
            ":headers",
            Value::Text(serde_json::to_string(&attempt.headers)?),
        );
        stmt.add_parameter(
            ":payload",
            Value::Text(serde_json::to_string(&attempt.events)?),
        );

        match stmt.execute_non_query(self.dialect.persist_commit()) {
            Ok(_) => {
                let checkpoint = handle.with(|conn| Ok(conn.last_insert_rowid()))?;
                handle.commit()?;
                debug!(
                    bucket = %attempt.bucket_id,
                    stream = %attempt.stream_id,
                    sequence = attempt.commit_sequence,
                    checkpoint,
                    "commit persisted"
                );
                Ok(Commit {
                    bucket_id: attempt.bucket_id.clone(),
                    stream_id: attempt.stream_id.clone(),
                    commit_id: attempt.commit_id,
                    commit_sequence: attempt.commit_sequence,
                    stream_revision: attempt.stream_revision,
                    checkpoint,
                    committed_at,
                    headers: attempt.headers.clone(),
                    events: attempt.events.clone(),
                })
            }
            Err(PersistenceError::Conflict(_)) => {
                handle.rollback()?;
                Err(self.refine_conflict(&handle, attempt))
            }
            Err(other) => {
                // Dropping the root handle rolls back and releases.
                Err(other)
            }
        }
    }

    /// Replay a stream's commits whose revision range overlaps
    /// `[min_revision, max_revision]`, in ascending commit sequence.
    /// `max_revision <= 0` means unbounded.
    pub fn read_stream(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: i64,
        max_revision: i64,
    ) -> Result<PagedCursor<Commit>> {
        let max_revision = if max_revision <= 0 {
            i64::MAX
        } else {
            max_revision
        };
        debug!(
            bucket = bucket_id,
            stream = stream_id,
            min_revision,
            max_revision,
            "reading stream"
        );
        let uow = UnitOfWork::new();
        let handle = self.acquire(&uow)?;
        let mut stmt = self.statement(handle);
        stmt.add_parameter(":bucket_id", Value::Text(bucket_id.to_string()));
        stmt.add_parameter(":stream_id", Value::Text(stream_id.to_string()));
        stmt.add_parameter(":min_revision", Value::Integer(min_revision));
        stmt.add_parameter(":max_revision", Value::Integer(max_revision));
        Ok(stmt.execute_paged_query(
            self.dialect.commits_from_revision(),
            commit_mapper(Arc::clone(&self.dialect)),
        ))
    }

    /// Replay every commit with a checkpoint greater than `checkpoint`,
    /// across all buckets and streams, in ascending checkpoint order.
    pub fn read_from_checkpoint(&self, checkpoint: i64) -> Result<PagedCursor<Commit>> {
        debug!(checkpoint, "reading from checkpoint");
        let uow = UnitOfWork::new();
        let handle = self.acquire(&uow)?;
        let mut stmt = self.statement(handle);
        stmt.add_parameter(":checkpoint", Value::Integer(checkpoint));
        Ok(stmt.execute_paged_query(
            self.dialect.commits_from_checkpoint(),
            commit_mapper(Arc::clone(&self.dialect)),
        ))
    }

    fn acquire(
        &self,
        uow: &UnitOfWork<ScopedConnection>,
    ) -> Result<ScopeHandle<ScopedConnection>> {
        let pool = self.pool.clone();
        uow.acquire(CONNECTION_SCOPE, move || {
            Ok(Some(ScopedConnection::new(pool.get()?)))
        })
    }

    fn statement(&self, handle: ScopeHandle<ScopedConnection>) -> SqlStatement {
        SqlStatement::new(Arc::clone(&self.dialect), handle).with_page_size(self.page_size)
    }

    /// Decide whether a tripped unique constraint was an idempotent
    /// replay of the same commit id or a losing optimistic write.
    fn refine_conflict(
        &self,
        handle: &ScopeHandle<ScopedConnection>,
        attempt: &CommitAttempt,
    ) -> PersistenceError {
        let mut probe = self.statement(handle.share());
        probe.add_parameter(":bucket_id", Value::Text(attempt.bucket_id.clone()));
        probe.add_parameter(":stream_id", Value::Text(attempt.stream_id.clone()));
        probe.add_parameter(":commit_id", Value::Text(attempt.commit_id.to_string()));
        match probe.execute_scalar(self.dialect.duplicate_commit()) {
            Ok(Value::Integer(n)) if n > 0 => {
                PersistenceError::DuplicateCommit(attempt.commit_id)
            }
            Ok(_) => PersistenceError::ConcurrencyConflict {
                bucket: attempt.bucket_id.clone(),
                stream: attempt.stream_id.clone(),
            },
            Err(error) => error,
        }
    }
}

/// Row mapper from the commit select column layout to [`Commit`].
fn commit_mapper(dialect: Arc<dyn SqlDialect>) -> RowMapper<Commit> {
    Box::new(move |row| {
        let commit_id: String = row.get(2)?;
        let commit_id = Uuid::parse_str(&commit_id).map_err(|e| conversion(2, e))?;
        let committed_at = dialect
            .normalize_datetime(row.get_ref(7)?)
            .map_err(|e| conversion(7, e))?;
        let headers: String = row.get(8)?;
        let headers = serde_json::from_str(&headers).map_err(|e| conversion(8, e))?;
        let payload: String = row.get(9)?;
        let events: Vec<EventMessage> =
            serde_json::from_str(&payload).map_err(|e| conversion(9, e))?;
        Ok(Commit {
            bucket_id: row.get(0)?,
            stream_id: row.get(1)?,
            commit_id,
            commit_sequence: row.get(3)?,
            stream_revision: row.get(4)?,
            checkpoint: row.get(6)?,
            committed_at,
            headers,
            events,
        })
    })
}

fn conversion(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
