//! SQL dialect abstraction.
//!
//! Every other component of the persistence core depends only on the
//! [`SqlDialect`] capability set, never on a specific engine. A new
//! backend needs one trait implementation (statement text, paging
//! capability, error classification, datetime handling) and no changes
//! to the executor, cursor, or scope logic.

mod sqlite;

pub use sqlite::SqliteDialect;

use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};

use crate::errors::Result;

/// Normalized classification of a native database error.
///
/// Callers branch on this typed result instead of sniffing engine
/// error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// A uniqueness-constraint violation (duplicate key).
    Unique,
    /// Any other native failure.
    Other,
}

/// Capability set implemented once per target SQL engine.
pub trait SqlDialect: Send + Sync {
    /// Idempotent schema-creation statement. Safe to re-run.
    fn initialize_storage(&self) -> &str;

    /// Optional index-creation statement, executed best-effort.
    fn initialize_indexes(&self) -> &str;

    /// Parameterized insert of one commit row. Must trip a detectable
    /// uniqueness violation when the sequence or commit-id invariants
    /// are violated.
    fn persist_commit(&self) -> &str;

    /// Ordered select of a stream's commits by revision range.
    fn commits_from_revision(&self) -> &str;

    /// Ordered select of all commits after a checkpoint.
    fn commits_from_checkpoint(&self) -> &str;

    /// Existence probe for a (bucket, stream, commit id) triple.
    fn duplicate_commit(&self) -> &str;

    /// Whether the engine supports server-side paging.
    fn can_page(&self) -> bool {
        true
    }

    /// Placeholder name for the paging offset.
    fn skip_param(&self) -> &str {
        ":skip"
    }

    /// Placeholder name for the paging limit.
    fn limit_param(&self) -> &str {
        ":limit"
    }

    /// Normalize a bound value to the engine's accepted representation.
    fn coalesce_parameter(&self, value: Value) -> Value {
        value
    }

    /// Classify a native error as duplicate-key or other.
    fn classify_error(&self, error: &rusqlite::Error) -> ErrorClass;

    /// Convert a stored timestamp to a UTC instant.
    ///
    /// Engines that round-trip timestamps as text must parse them;
    /// engines with native time types pass through with UTC conversion.
    fn normalize_datetime(&self, value: ValueRef<'_>) -> Result<DateTime<Utc>>;
}
