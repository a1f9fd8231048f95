//! Edges between learnings and their provenance sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::timestamp_now;

/// Kind of edge in the consistency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Learning was extracted from a session (learning -> session)
    DerivedFrom,
    /// Newer learning replaces an older one (newer -> older)
    Supersedes,
    /// Two learnings disagree
    Contradicts,
    /// Two learnings reinforce each other
    Supports,
}

impl EdgeKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DerivedFrom => "derived_from",
            Self::Supersedes => "supersedes",
            Self::Contradicts => "contradicts",
            Self::Supports => "supports",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "derived_from" => Some(Self::DerivedFrom),
            "supersedes" => Some(Self::Supersedes),
            "contradicts" => Some(Self::Contradicts),
            "supports" => Some(Self::Supports),
            _ => None,
        }
    }

    /// Get all edge kinds
    pub fn all() -> &'static [EdgeKind] {
        &[
            Self::DerivedFrom,
            Self::Supersedes,
            Self::Contradicts,
            Self::Supports,
        ]
    }

    /// Whether (a, b) and (b, a) denote the same edge
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Contradicts | Self::Supports)
    }

    /// Whether the target endpoint is a learning (as opposed to a session)
    pub fn targets_learning(&self) -> bool {
        !matches!(self, Self::DerivedFrom)
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningEdge {
    pub id: String,
    pub kind: EdgeKind,
    pub from_id: String,
    pub to_id: String,
    pub created_at: DateTime<Utc>,
}

impl LearningEdge {
    /// Create a new edge; symmetric kinds store endpoints in sorted order
    pub fn new(kind: EdgeKind, from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        let (from_id, to_id) = normalize_endpoints(kind, from_id.into(), to_id.into());
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            from_id,
            to_id,
            created_at: timestamp_now(),
        }
    }

    /// Whether this edge touches the given node
    pub fn involves(&self, id: &str) -> bool {
        self.from_id == id || self.to_id == id
    }

    /// The endpoint opposite to `id`, if `id` is an endpoint
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.from_id == id {
            Some(&self.to_id)
        } else if self.to_id == id {
            Some(&self.from_id)
        } else {
            None
        }
    }
}

/// Order endpoints of symmetric edges so each unordered pair is stored once
pub fn normalize_endpoints(kind: EdgeKind, from_id: String, to_id: String) -> (String, String) {
    if kind.is_symmetric() && to_id < from_id {
        (to_id, from_id)
    } else {
        (from_id, to_id)
    }
}
