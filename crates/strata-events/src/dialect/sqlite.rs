//! `SQLite` dialect.
//!
//! Statement text is embedded at compile time via [`include_str!`].
//! Duplicate-key detection uses `SQLite` extended result codes rather
//! than error-message matching, so foreign-key and other constraint
//! failures never classify as duplicates.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::ffi;
use rusqlite::types::ValueRef;

use super::{ErrorClass, SqlDialect};
use crate::errors::{PersistenceError, Result};

/// Dialect for `SQLite` backends.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn initialize_storage(&self) -> &str {
        include_str!("sqlite/init.sql")
    }

    fn initialize_indexes(&self) -> &str {
        include_str!("sqlite/indexes.sql")
    }

    fn persist_commit(&self) -> &str {
        include_str!("sqlite/persist_commit.sql")
    }

    fn commits_from_revision(&self) -> &str {
        include_str!("sqlite/commits_from_revision.sql")
    }

    fn commits_from_checkpoint(&self) -> &str {
        include_str!("sqlite/commits_from_checkpoint.sql")
    }

    fn duplicate_commit(&self) -> &str {
        include_str!("sqlite/duplicate_commit.sql")
    }

    fn classify_error(&self, error: &rusqlite::Error) -> ErrorClass {
        match error {
            rusqlite::Error::SqliteFailure(code, _)
                if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                ErrorClass::Unique
            }
            _ => ErrorClass::Other,
        }
    }

    fn normalize_datetime(&self, value: ValueRef<'_>) -> Result<DateTime<Utc>> {
        match value {
            // SQLite round-trips timestamps as text.
            ValueRef::Text(raw) => {
                let text = std::str::from_utf8(raw).map_err(|e| PersistenceError::Storage {
                    message: format!("timestamp is not valid utf-8: {e}"),
                })?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    PersistenceError::Storage {
                        message: format!("unparseable timestamp '{text}': {e}"),
                    }
                })?;
                Ok(parsed.with_timezone(&Utc))
            }
            ValueRef::Integer(seconds) => {
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| PersistenceError::Storage {
                        message: format!("epoch seconds out of range: {seconds}"),
                    })
            }
            other => Err(PersistenceError::Storage {
                message: format!("unsupported timestamp representation: {:?}", other.data_type()),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
