//! # strata-events
//!
//! Event-sourced commit store with a `SQLite` persistence backend.
//!
//! Streams of immutable commits, responsible for:
//!
//! - **Commit protocol**: Optimistic append arbitrated by storage unique
//!   constraints, with duplicate-commit and concurrency-conflict refinement
//! - **Dialect abstraction**: [`dialect::SqlDialect`] capability trait; one
//!   implementation per engine, `SQLite` fully specified
//! - **Statement executor**: Named-parameter staging, typed duplicate-key
//!   mapping, one sanctioned best-effort swallow path
//! - **Paged cursor**: Lazy single-pass replay that releases its connection
//!   on exhaustion, failure, or drop
//! - **Scoped resources**: Explicit unit-of-work sharing of one pooled
//!   connection across nested operations
//! - **Store façade**: [`store::EventStore`] / [`store::EventStream`]
//!   open-replay-stage-commit workflow

#![deny(unsafe_code)]

pub mod config;
pub mod dialect;
pub mod engine;
pub mod errors;
pub mod sql;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use engine::SqlPersistenceEngine;
pub use errors::{PersistenceError, Result};
pub use store::{EventStore, EventStream};
pub use types::{Commit, CommitAttempt, EventMessage};
