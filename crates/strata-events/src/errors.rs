//! Error types for the persistence core.
//!
//! [`PersistenceError`] is the primary error type returned by all store
//! operations. Conflict-shaped variants (`Conflict`, `DuplicateCommit`,
//! `ConcurrencyConflict`) are recoverable by the caller; everything else
//! is an infrastructure or programming failure surfaced unchanged.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing engine reported a uniqueness-constraint violation.
    ///
    /// Raised by the statement executor when the dialect classifies a
    /// native failure as a duplicate key. The commit protocol refines
    /// this into [`DuplicateCommit`](Self::DuplicateCommit) or
    /// [`ConcurrencyConflict`](Self::ConcurrencyConflict).
    #[error("unique key violation: {0}")]
    Conflict(#[source] rusqlite::Error),

    /// A commit with this commit id was already applied to the stream.
    ///
    /// Idempotent resubmission — the persisted state is unchanged and
    /// callers should treat it as success-already-applied.
    #[error("commit {0} was already persisted to this stream")]
    DuplicateCommit(Uuid),

    /// The stream advanced past the revision the caller observed.
    ///
    /// Another writer committed the contested sequence number first.
    /// Callers must reload the stream and retry with fresh data.
    #[error("concurrent write detected on stream {stream} in bucket {bucket}")]
    ConcurrencyConflict {
        /// Bucket of the contested stream.
        bucket: String,
        /// Identifier of the contested stream.
        stream: String,
    },

    /// A scope factory produced no resource. Programming error.
    #[error("scope factory for key '{0}' returned no resource")]
    InvalidFactoryResult(String),

    /// The scoped connection was already released by its root owner.
    #[error("connection was released by its scope owner")]
    ConnectionReleased,

    /// Invalid operation on the store.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Storage initialization or schema failure.
    #[error("storage error: {message}")]
    Storage {
        /// Describes what part of storage setup failed and why.
        message: String,
    },
}

impl PersistenceError {
    /// Whether the caller can recover by retrying or treating the commit
    /// as already applied.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::DuplicateCommit(_) | Self::ConcurrencyConflict { .. }
        )
    }
}

/// Convenience type alias for persistence results.
pub type Result<T> = std::result::Result<T, PersistenceError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
