//! Parameterized statement executor.
//!
//! [`SqlStatement`] stages named parameters, binds them against prepared
//! statements, and maps native duplicate-key failures into the typed
//! [`PersistenceError::Conflict`] signal via the dialect's error
//! classification. Query execution hands rows back lazily through a
//! [`PagedCursor`].

use std::sync::Arc;

use rusqlite::Row;
use rusqlite::types::Value;
use tracing::{debug, warn};

use crate::dialect::{ErrorClass, SqlDialect};
use crate::errors::{PersistenceError, Result};
use crate::sql::connection::ScopedConnection;
use crate::sql::paging::PagedCursor;
use crate::sql::scope::ScopeHandle;

/// Maps one result row into a typed value.
pub type RowMapper<T> = Box<dyn Fn(&Row<'_>) -> rusqlite::Result<T>>;

/// Executor for parameterized SQL against a scoped connection.
///
/// Staged parameters persist across executions on the same instance;
/// re-staging a name replaces its value (last write wins). Parameters
/// absent from a given statement's text are skipped at bind time, which
/// absorbs dialect variance in placeholder usage.
pub struct SqlStatement {
    dialect: Arc<dyn SqlDialect>,
    conn: ScopeHandle<ScopedConnection>,
    params: Vec<(String, Value)>,
    page_size: usize,
}

impl SqlStatement {
    /// Create an executor over the given dialect and connection handle.
    pub fn new(dialect: Arc<dyn SqlDialect>, conn: ScopeHandle<ScopedConnection>) -> Self {
        Self {
            dialect,
            conn,
            params: Vec::new(),
            page_size: 0,
        }
    }

    /// Set the page size used by [`execute_paged_query`](Self::execute_paged_query).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stage a named parameter. Last write for a name wins.
    pub fn add_parameter(&mut self, name: &str, value: Value) {
        let value = self.dialect.coalesce_parameter(value);
        debug!(name, "staging parameter");
        if let Some(slot) = self.params.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
    }

    /// Execute a statement and return the affected row count.
    ///
    /// A native failure the dialect classifies as a duplicate key
    /// surfaces as [`PersistenceError::Conflict`]; anything else
    /// propagates unchanged.
    pub fn execute_non_query(&self, sql: &str) -> Result<usize> {
        debug!(sql, "executing non-query");
        self.conn
            .with(|conn| {
                let mut stmt = conn.prepare(sql)?;
                bind_parameters(&mut stmt, &self.params)?;
                Ok(stmt.raw_execute()?)
            })
            .map_err(|e| self.map_conflict(e))
    }

    /// Execute a statement and return the first column of the first
    /// row, or [`Value::Null`] when the result is empty.
    pub fn execute_scalar(&self, sql: &str) -> Result<Value> {
        debug!(sql, "executing scalar");
        self.conn
            .with(|conn| {
                let mut stmt = conn.prepare(sql)?;
                bind_parameters(&mut stmt, &self.params)?;
                let mut rows = stmt.raw_query();
                match rows.next()? {
                    Some(row) => Ok(row.get::<_, Value>(0)?),
                    None => Ok(Value::Null),
                }
            })
            .map_err(|e| self.map_conflict(e))
    }

    /// Execute a best-effort statement, swallowing any failure.
    ///
    /// Binds the staged parameter set like every other execution and
    /// returns the affected row count, or 0 when the execution failed.
    /// This is the one path that suppresses errors; use it only for
    /// non-critical statements such as optional index creation.
    pub fn execute_ignoring_errors(&self, sql: &str) -> usize {
        let result = self.conn.with(|conn| {
            let mut stmt = conn.prepare(sql)?;
            bind_parameters(&mut stmt, &self.params)?;
            Ok(stmt.raw_execute()?)
        });
        match result {
            Ok(affected) => affected,
            Err(error) => {
                warn!(%error, "suppressed failure of best-effort statement");
                0
            }
        }
    }

    /// Execute a query as an unpaged lazy sequence of mapped rows.
    ///
    /// Consumes the executor; its connection handle moves into the
    /// cursor, which releases it on exhaustion, failure, or drop.
    pub fn execute_query<T>(self, sql: &str, mapper: RowMapper<T>) -> PagedCursor<T> {
        PagedCursor::new(self.dialect, self.conn, sql, self.params, mapper, 0)
    }

    /// Execute a query as a lazily paged sequence of mapped rows.
    ///
    /// Pages server-side when the dialect supports it and the page size
    /// is non-zero; otherwise degrades to a single unpaged fetch.
    pub fn execute_paged_query<T>(self, sql: &str, mapper: RowMapper<T>) -> PagedCursor<T> {
        let page_size = if self.dialect.can_page() {
            self.page_size
        } else {
            0
        };
        PagedCursor::new(self.dialect, self.conn, sql, self.params, mapper, page_size)
    }

    fn map_conflict(&self, error: PersistenceError) -> PersistenceError {
        match error {
            PersistenceError::Sqlite(native)
                if self.dialect.classify_error(&native) == ErrorClass::Unique =>
            {
                PersistenceError::Conflict(native)
            }
            other => other,
        }
    }
}

/// Bind staged parameters to a prepared statement, skipping names the
/// statement text does not reference.
pub(crate) fn bind_parameters(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[(String, Value)],
) -> Result<()> {
    for (name, value) in params {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
