//! Generic SQL plumbing shared by every dialect.
//!
//! # Architecture
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode and busy
//!   timeout applied to every connection, plus the scoped connection
//!   resource that a unit of work shares.
//! - **[`scope`]**: explicit unit-of-work context — nested operations
//!   reuse one resource, only the root acquirer releases it.
//! - **[`statement`]**: parameterized statement executor with typed
//!   duplicate-key mapping through the dialect.
//! - **[`paging`]**: lazy, single-pass paged cursor over query results.

pub mod connection;
pub mod paging;
pub mod scope;
pub mod statement;

pub use connection::{ConnectionPool, PooledConnection, ScopedConnection, build_pool};
pub use paging::PagedCursor;
pub use scope::{ScopeHandle, ScopedRelease, UnitOfWork};
pub use statement::{RowMapper, SqlStatement};
