//! Repository trait for learning persistence
//!
//! The trait abstracts over storage backends. Implementations are responsible
//! for the guarantees that need atomicity: id and natural-key uniqueness,
//! the single-statement access counter, and the all-or-nothing supersession
//! insert.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::session::SessionRecord;
use crate::error::Result;

use super::edge::{EdgeKind, LearningEdge};
use super::entity::{Learning, NaturalKey};
use super::event::LearningEvent;

/// Repository trait for learnings, their edges and audit events
#[async_trait]
pub trait LearningRepository: Send + Sync {
    // ========== Learning Operations ==========

    /// Insert a learning unless its natural key is already taken
    ///
    /// Fails with `DuplicateKey` when the id exists under a different
    /// natural key.
    async fn insert_learning(&self, learning: &Learning) -> Result<InsertOutcome>;

    /// Get a learning by ID
    async fn get_learning(&self, id: &str) -> Result<Option<Learning>>;

    /// Get the id of the learning holding a natural key
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<String>>;

    /// Overwrite mutable fields if the stored `updated_at` still equals `expected_updated_at`
    ///
    /// Returns `false` when the row changed underneath (or vanished).
    async fn replace_learning(
        &self,
        learning: &Learning,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically increment the access counter; returns `false` if the id is unknown
    async fn mark_accessed(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Increment the access counter of every id in one transaction
    ///
    /// Returns the ids that do not exist. When any are missing nothing is
    /// written.
    async fn mark_accessed_all(&self, ids: &[String], now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Clear the active flag; returns `false` if the id is unknown
    ///
    /// `updated_at` is left alone so deactivation does not count as an edit.
    async fn deactivate_learning(&self, id: &str) -> Result<bool>;

    /// Learnings matching a scope query
    async fn list_visible(&self, query: &ScopeQuery) -> Result<Vec<Learning>>;

    /// Deactivate every active learning with `expires_at <= now`, returning their ids
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Aggregate counts, optionally for a single app
    async fn learning_stats(&self, app: Option<&str>, now: DateTime<Utc>) -> Result<LearningStats>;

    // ========== Session Operations ==========

    /// Register a session; an existing id is kept as stored
    async fn save_session(&self, session: &SessionRecord) -> Result<SessionRecord>;

    /// Get a session by ID
    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>>;

    // ========== Edge Operations ==========

    /// Insert an edge, or return the stored one when it already exists
    ///
    /// For `supersedes` the insert, the reachability check and the flag
    /// update on the older learning share one transaction. A cycle rolls
    /// everything back and yields `ConsistencyViolation`.
    async fn insert_edge(&self, edge: &LearningEdge) -> Result<EdgeInsertOutcome>;

    /// List edges, optionally of one kind
    async fn list_edges(&self, kind: Option<EdgeKind>) -> Result<Vec<LearningEdge>>;

    /// List all edges touching a node
    async fn list_edges_for(&self, id: &str) -> Result<Vec<LearningEdge>>;

    /// Edges of one kind with both endpoints in `ids`
    async fn edges_among(&self, kind: EdgeKind, ids: &[String]) -> Result<Vec<LearningEdge>>;

    /// Ids reachable from `id` by following `supersedes` edges, nearest first
    ///
    /// Uses recursive CTE for graph traversal.
    async fn supersession_descendants(&self, id: &str) -> Result<Vec<String>>;

    // ========== Event Operations ==========

    /// Append an audit event
    async fn append_event(&self, event: &LearningEvent) -> Result<()>;

    /// Events for a learning in chronological order
    async fn list_events(&self, learning_id: &str) -> Result<Vec<LearningEvent>>;
}

/// Result of an idempotent insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was written
    Created(String),
    /// The natural key was already taken by this id; nothing was written
    Existing(String),
}

impl InsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_id(self) -> String {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Result of adding an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeInsertOutcome {
    Created(LearningEdge),
    /// The same (kind, from, to) was already stored
    Existing(LearningEdge),
}

impl EdgeInsertOutcome {
    pub fn edge(&self) -> &LearningEdge {
        match self {
            Self::Created(edge) | Self::Existing(edge) => edge,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_edge(self) -> LearningEdge {
        match self {
            Self::Created(edge) | Self::Existing(edge) => edge,
        }
    }
}

/// Candidate selection for one actor within one app
#[derive(Debug, Clone)]
pub struct ScopeQuery {
    pub app: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Also return superseded, inactive and expired learnings
    pub include_historical: bool,
    /// Reference time for the expiry filter
    pub now: DateTime<Utc>,
}

/// Aggregate statistics over stored learnings
#[derive(Debug, Clone, Default, Serialize)]
pub struct LearningStats {
    pub total: u64,
    /// Visible to default retrieval
    pub active: u64,
    pub superseded: u64,
    /// Soft-deleted or swept
    pub inactive: u64,
    /// Past `expires_at` but not yet swept
    pub expired_unswept: u64,
    pub by_scope: BTreeMap<String, u64>,
    pub by_variant: BTreeMap<String, u64>,
    pub average_importance: f64,
    pub average_confidence: f64,
    pub edges_by_kind: BTreeMap<String, u64>,
}
