//! Commit and event types — the core persisted shapes.
//!
//! A [`Commit`] is an atomic, immutable batch of [`EventMessage`]s
//! appended to exactly one stream. Event bodies are stored as opaque
//! [`serde_json::Value`] so callers keep full control of their wire
//! format; typed access is the caller's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single domain event carried inside a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Metadata attached to this event.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    /// Event payload (opaque JSON).
    pub body: Value,
}

impl EventMessage {
    /// Build an event with the given body and no headers.
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            headers: Map::new(),
            body: body.into(),
        }
    }
}

/// A batch of events a caller intends to append to a stream.
///
/// Carries the commit sequence and stream revision the caller observed;
/// if the stream advanced in the meantime, the insert trips the unique
/// constraint and surfaces as a concurrency conflict.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAttempt {
    /// Bucket the stream lives in.
    pub bucket_id: String,
    /// Stream to append to.
    pub stream_id: String,
    /// Client-supplied opaque unique token for this commit.
    pub commit_id: Uuid,
    /// Sequence this commit will occupy within the stream (1-based).
    pub commit_sequence: i64,
    /// Last stream revision this batch covers.
    pub stream_revision: i64,
    /// Commit-level metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    /// Ordered events in the batch.
    pub events: Vec<EventMessage>,
}

impl CommitAttempt {
    /// Build an attempt for the first commit after `expected_revision`,
    /// with `commit_sequence` following `expected_sequence`.
    pub fn new(
        bucket_id: impl Into<String>,
        stream_id: impl Into<String>,
        commit_id: Uuid,
        expected_sequence: i64,
        expected_revision: i64,
        events: Vec<EventMessage>,
    ) -> Self {
        let stream_revision = expected_revision + events.len() as i64;
        Self {
            bucket_id: bucket_id.into(),
            stream_id: stream_id.into(),
            commit_id,
            commit_sequence: expected_sequence + 1,
            stream_revision,
            headers: Map::new(),
            events,
        }
    }

    /// First stream revision this batch covers.
    pub fn starting_revision(&self) -> i64 {
        self.stream_revision - self.events.len() as i64 + 1
    }
}

/// A persisted commit, as read back from storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Bucket the stream lives in.
    pub bucket_id: String,
    /// Stream this commit belongs to.
    pub stream_id: String,
    /// Client-supplied unique token.
    pub commit_id: Uuid,
    /// Monotonic per-stream sequence (1-based, gapless).
    pub commit_sequence: i64,
    /// Last stream revision this commit covers.
    pub stream_revision: i64,
    /// Store-wide monotonic position for global ordered replay.
    pub checkpoint: i64,
    /// UTC instant the commit was persisted.
    pub committed_at: DateTime<Utc>,
    /// Commit-level metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    /// Ordered events in the batch.
    pub events: Vec<EventMessage>,
}

impl Commit {
    /// First stream revision this commit covers.
    pub fn starting_revision(&self) -> i64 {
        self.stream_revision - self.events.len() as i64 + 1
    }

    /// Revision range `[first, last]` covered by this commit.
    pub fn revision_range(&self) -> (i64, i64) {
        (self.starting_revision(), self.stream_revision)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
