//! Caller-facing store and stream façade.
//!
//! [`EventStore`] wires a dialect, a pool, and the persistence engine
//! together. [`EventStream`] is a unit-of-work view over one stream: it
//! replays committed events, stages new ones, and stamps the observed
//! commit sequence and revision into the attempt so the storage-level
//! unique constraints arbitrate concurrent writers.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::dialect::{SqlDialect, SqliteDialect};
use crate::engine::SqlPersistenceEngine;
use crate::errors::{PersistenceError, Result};
use crate::sql::{PagedCursor, build_pool};
use crate::types::{Commit, CommitAttempt, EventMessage};

/// An event store over a SQL persistence backend.
pub struct EventStore {
    engine: SqlPersistenceEngine,
}

impl EventStore {
    /// Open a store with the SQLite dialect and initialize its schema.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_dialect(config, Arc::new(SqliteDialect))
    }

    /// Open a store with an explicit dialect and initialize its schema.
    pub fn open_with_dialect(config: &StoreConfig, dialect: Arc<dyn SqlDialect>) -> Result<Self> {
        let pool = build_pool(config)?;
        let engine = SqlPersistenceEngine::new(dialect, pool, config);
        engine.initialize()?;
        Ok(Self { engine })
    }

    /// Open a stream view, replaying committed events whose revision
    /// falls in `[min_revision, max_revision]`. `max_revision <= 0`
    /// means unbounded. A stream with no commits opens empty at
    /// revision 0.
    pub fn open_stream(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: i64,
        max_revision: i64,
    ) -> Result<EventStream<'_>> {
        let mut stream = EventStream {
            engine: &self.engine,
            bucket_id: bucket_id.to_string(),
            stream_id: stream_id.to_string(),
            stream_revision: 0,
            commit_sequence: 0,
            committed: Vec::new(),
            uncommitted: Vec::new(),
            uncommitted_headers: Map::new(),
        };
        stream.populate(min_revision, max_revision)?;
        Ok(stream)
    }

    /// Replay every commit after `from_checkpoint` across all buckets
    /// and streams, in global checkpoint order.
    pub fn read_all(&self, from_checkpoint: i64) -> Result<PagedCursor<Commit>> {
        self.engine.read_from_checkpoint(from_checkpoint)
    }

    /// Direct access to the persistence engine.
    pub fn engine(&self) -> &SqlPersistenceEngine {
        &self.engine
    }
}

/// A unit-of-work view over one event stream.
///
/// Tracks the commit sequence and stream revision observed at open
/// time; those stamps make each [`commit_changes`](Self::commit_changes)
/// an optimistic write that loses cleanly when another writer got
/// there first.
pub struct EventStream<'a> {
    engine: &'a SqlPersistenceEngine,
    bucket_id: String,
    stream_id: String,
    stream_revision: i64,
    commit_sequence: i64,
    committed: Vec<EventMessage>,
    uncommitted: Vec<EventMessage>,
    uncommitted_headers: Map<String, Value>,
}

impl EventStream<'_> {
    /// Bucket this stream lives in.
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Stream identifier.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Last committed revision observed by this view.
    pub fn stream_revision(&self) -> i64 {
        self.stream_revision
    }

    /// Sequence of the last commit observed by this view.
    pub fn commit_sequence(&self) -> i64 {
        self.commit_sequence
    }

    /// Events replayed from storage, in order.
    pub fn committed_events(&self) -> &[EventMessage] {
        &self.committed
    }

    /// Events staged locally but not yet committed.
    pub fn uncommitted_events(&self) -> &[EventMessage] {
        &self.uncommitted
    }

    /// Stage an event for the next commit.
    pub fn add(&mut self, event: EventMessage) {
        self.uncommitted.push(event);
    }

    /// Attach metadata to the next commit.
    pub fn set_header(&mut self, key: impl Into<String>, value: Value) {
        let _ = self.uncommitted_headers.insert(key.into(), value);
    }

    /// Persist the staged events as one commit under `commit_id`.
    ///
    /// On success the staged events fold into the committed view and
    /// the stamps advance. [`PersistenceError::DuplicateCommit`] and
    /// [`PersistenceError::ConcurrencyConflict`] leave the staged
    /// events in place; reloading and retrying is the caller's call.
    pub fn commit_changes(&mut self, commit_id: Uuid) -> Result<Commit> {
        if self.uncommitted.is_empty() {
            return Err(PersistenceError::InvalidOperation(
                "no uncommitted events to commit".to_string(),
            ));
        }
        let mut attempt = CommitAttempt::new(
            self.bucket_id.clone(),
            self.stream_id.clone(),
            commit_id,
            self.commit_sequence,
            self.stream_revision,
            self.uncommitted.clone(),
        );
        attempt.headers = self.uncommitted_headers.clone();
        debug!(
            bucket = %self.bucket_id,
            stream = %self.stream_id,
            sequence = attempt.commit_sequence,
            events = attempt.events.len(),
            "committing staged events"
        );
        let commit = self.engine.commit(&attempt)?;
        self.committed.append(&mut self.uncommitted);
        self.uncommitted_headers = Map::new();
        self.stream_revision = commit.stream_revision;
        self.commit_sequence = commit.commit_sequence;
        Ok(commit)
    }

    fn populate(&mut self, min_revision: i64, max_revision: i64) -> Result<()> {
        let max_revision = if max_revision <= 0 {
            i64::MAX
        } else {
            max_revision
        };
        let cursor = self.engine.read_stream(
            &self.bucket_id,
            &self.stream_id,
            min_revision,
            max_revision,
        )?;
        for commit in cursor {
            let commit = commit?;
            self.commit_sequence = commit.commit_sequence;
            let mut revision = commit.starting_revision();
            for event in commit.events {
                if revision > max_revision {
                    break;
                }
                if revision >= min_revision {
                    self.committed.push(event);
                    self.stream_revision = revision;
                }
                revision += 1;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn store() -> EventStore {
        EventStore::open(&StoreConfig::default().with_page_size(2)).unwrap()
    }

    #[test]
    fn fresh_stream_opens_empty_at_revision_zero() {
        let store = store();
        let stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        assert_eq!(stream.stream_revision(), 0);
        assert_eq!(stream.commit_sequence(), 0);
        assert!(stream.committed_events().is_empty());
    }

    #[test]
    fn commit_then_reopen_replays_the_events() {
        let store = store();
        let mut stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        stream.add(EventMessage::new(json!({"body": "hello"})));
        let commit = stream.commit_changes(Uuid::new_v4()).unwrap();
        assert_eq!(commit.revision_range(), (1, 1));

        let reopened = store.open_stream("Banking", "1234", 0, 0).unwrap();
        assert_eq!(reopened.stream_revision(), 1);
        assert_eq!(reopened.commit_sequence(), 1);
        assert_eq!(reopened.committed_events().len(), 1);
        assert_eq!(reopened.committed_events()[0].body, json!({"body": "hello"}));
    }

    #[test]
    fn commit_folds_staged_events_into_the_view() {
        let store = store();
        let mut stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        stream.add(EventMessage::new(json!(1)));
        stream.add(EventMessage::new(json!(2)));
        let _ = stream.commit_changes(Uuid::new_v4()).unwrap();
        assert_eq!(stream.committed_events().len(), 2);
        assert!(stream.uncommitted_events().is_empty());
        assert_eq!(stream.stream_revision(), 2);
    }

    #[test]
    fn committing_nothing_is_an_invalid_operation() {
        let store = store();
        let mut stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        let result = stream.commit_changes(Uuid::new_v4());
        assert_matches!(result, Err(PersistenceError::InvalidOperation(_)));
    }

    #[test]
    fn conflict_keeps_staged_events_for_retry() {
        let store = store();
        let mut loser = store.open_stream("Banking", "1234", 0, 0).unwrap();
        let mut winner = store.open_stream("Banking", "1234", 0, 0).unwrap();

        winner.add(EventMessage::new(json!("first")));
        let _ = winner.commit_changes(Uuid::new_v4()).unwrap();

        loser.add(EventMessage::new(json!("second")));
        let result = loser.commit_changes(Uuid::new_v4());
        assert_matches!(result, Err(PersistenceError::ConcurrencyConflict { .. }));
        assert_eq!(loser.uncommitted_events().len(), 1);
    }

    #[test]
    fn revision_window_trims_replayed_events() {
        let store = store();
        let mut stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        for n in 1..=5 {
            stream.add(EventMessage::new(json!(n)));
        }
        let _ = stream.commit_changes(Uuid::new_v4()).unwrap();

        let window = store.open_stream("Banking", "1234", 2, 4).unwrap();
        let bodies: Vec<&Value> = window.committed_events().iter().map(|e| &e.body).collect();
        assert_eq!(bodies, vec![&json!(2), &json!(3), &json!(4)]);
        assert_eq!(window.stream_revision(), 4);
    }

    #[test]
    fn commit_headers_travel_with_the_commit() {
        let store = store();
        let mut stream = store.open_stream("Banking", "1234", 0, 0).unwrap();
        stream.add(EventMessage::new(json!("x")));
        stream.set_header("origin", json!("test"));
        let commit = stream.commit_changes(Uuid::new_v4()).unwrap();
        assert_eq!(commit.headers.get("origin"), Some(&json!("test")));
    }

    #[test]
    fn read_all_walks_commits_across_streams() {
        let store = store();
        for stream_id in ["a", "b", "a"] {
            let mut stream = store.open_stream("Banking", stream_id, 0, 0).unwrap();
            stream.add(EventMessage::new(json!(stream_id)));
            let _ = stream.commit_changes(Uuid::new_v4()).unwrap();
        }
        let commits: Vec<Commit> = store
            .read_all(0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let checkpoints: Vec<i64> = commits.iter().map(|c| c.checkpoint).collect();
        assert_eq!(checkpoints, vec![1, 2, 3]);
    }
}
