//! Lazy paged query cursor.
//!
//! [`PagedCursor`] walks a query result one page at a time, fetching
//! the next page only when the buffered rows run out. A page that comes
//! back short of the page size marks the sequence exhausted without an
//! extra round trip. The cursor owns its connection handle and releases
//! it on exhaustion, failure, or drop, so abandoning iteration midway
//! never leaks the underlying resource.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::types::Value;
use tracing::debug;

use crate::dialect::SqlDialect;
use crate::errors::Result;
use crate::sql::connection::ScopedConnection;
use crate::sql::scope::ScopeHandle;
use crate::sql::statement::{RowMapper, bind_parameters};

enum CursorState {
    Primed,
    Yielding { last_page_full: bool },
    Exhausted,
    Failed,
}

/// Lazily paged sequence of mapped query rows.
pub struct PagedCursor<T> {
    dialect: Arc<dyn SqlDialect>,
    conn: Option<ScopeHandle<ScopedConnection>>,
    statement: String,
    params: Vec<(String, Value)>,
    mapper: RowMapper<T>,
    page_size: usize,
    skip: usize,
    buffer: VecDeque<T>,
    state: CursorState,
    pages_fetched: usize,
}

impl<T> PagedCursor<T> {
    pub(crate) fn new(
        dialect: Arc<dyn SqlDialect>,
        conn: ScopeHandle<ScopedConnection>,
        statement: &str,
        params: Vec<(String, Value)>,
        mapper: RowMapper<T>,
        page_size: usize,
    ) -> Self {
        Self {
            dialect,
            conn: Some(conn),
            statement: statement.to_string(),
            params,
            mapper,
            page_size,
            skip: 0,
            buffer: VecDeque::new(),
            state: CursorState::Primed,
            pages_fetched: 0,
        }
    }

    /// Number of pages fetched so far. Diagnostic only.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page into the buffer and report whether it came
    /// back full. An unpaged cursor fetches everything in one pass.
    fn fetch_page(&mut self) -> Result<bool> {
        let limit = if self.page_size == 0 {
            // Negative LIMIT means unbounded.
            -1
        } else {
            i64::try_from(self.page_size).unwrap_or(i64::MAX)
        };
        let skip_name = self.dialect.skip_param().to_string();
        let limit_name = self.dialect.limit_param().to_string();
        let skip = i64::try_from(self.skip).unwrap_or(i64::MAX);
        self.upsert_param(&skip_name, Value::Integer(skip));
        self.upsert_param(&limit_name, Value::Integer(limit));

        let conn = self
            .conn
            .as_ref()
            .ok_or(crate::errors::PersistenceError::ConnectionReleased)?;
        let rows = conn.with(|conn| {
            let mut stmt = conn.prepare(&self.statement)?;
            bind_parameters(&mut stmt, &self.params)?;
            let mut rows = stmt.raw_query();
            let mut fetched = Vec::new();
            while let Some(row) = rows.next()? {
                fetched.push((self.mapper)(row)?);
            }
            Ok(fetched)
        })?;

        self.pages_fetched += 1;
        let fetched = rows.len();
        debug!(page = self.pages_fetched, rows = fetched, "fetched page");
        let full = self.page_size > 0 && fetched == self.page_size;
        self.skip += fetched;
        self.buffer.extend(rows);
        Ok(full)
    }

    fn upsert_param(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.params.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
    }

    fn terminate(&mut self, state: CursorState) {
        self.state = state;
        // Dropping the handle releases the connection when this cursor
        // held the root scope.
        self.conn = None;
    }
}

impl<T> Iterator for PagedCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                CursorState::Primed => match self.fetch_page() {
                    Ok(full) => {
                        self.state = CursorState::Yielding {
                            last_page_full: full,
                        };
                    }
                    Err(error) => {
                        self.terminate(CursorState::Failed);
                        return Some(Err(error));
                    }
                },
                CursorState::Yielding { last_page_full } => {
                    if let Some(item) = self.buffer.pop_front() {
                        return Some(Ok(item));
                    }
                    if last_page_full {
                        self.state = CursorState::Primed;
                    } else {
                        self.terminate(CursorState::Exhausted);
                        return None;
                    }
                }
                CursorState::Exhausted | CursorState::Failed => return None,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
